use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{_mm_prefetch, _MM_HINT_NTA};

use argon2::{Algorithm, Argon2, Block, Params, Version};
use crossbeam_channel::unbounded;

use super::blake2_generator::Blake2Generator;
use super::common::{
    ARGON_BLOCK_SIZE, ARGON_ITERATIONS, ARGON_LANES, ARGON_MEMORY, ARGON_SALT, CACHE_ACCESSES,
    CACHE_LINE_SIZE, CACHE_SIZE, DATASET_ITEM_COUNT,
};
use super::flags::Flags;
use super::pages::PageBuffer;
use super::superscalar::ScProgram;
use byte_string;
use error::{Result, RxError};

const SUPERSCALAR_MUL_0: u64 = 6364136223846793005;
const SUPERSCALAR_ADD_1: u64 = 9298411001130361340;
const SUPERSCALAR_ADD_2: u64 = 12065312585734608966;
const SUPERSCALAR_ADD_3: u64 = 9306329213124626780;
const SUPERSCALAR_ADD_4: u64 = 5281919268842080866;
const SUPERSCALAR_ADD_5: u64 = 10536153434571861004;
const SUPERSCALAR_ADD_6: u64 = 3398623926847679864;
const SUPERSCALAR_ADD_7: u64 = 9549104520008361294;

const WORDS_PER_BLOCK: u64 = (ARGON_BLOCK_SIZE / 8) as u64;
const CACHE_LINE_MASK: u64 = (CACHE_SIZE as u64 / CACHE_LINE_SIZE) - 1;

/// 256MiB of Argon2d output plus the superscalar programs derived from the
/// same key. Immutable once built and shared between VMs through an `Arc`.
pub struct Cache {
    pub key: Vec<u8>,
    pub blocks: Vec<Block>,
    pub programs: Vec<ScProgram>,
}

impl Cache {
    pub fn new(key: &[u8]) -> Result<Cache> {
        let start = Instant::now();

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(ARGON_MEMORY as usize)
            .map_err(|_| RxError::AllocationFailure {
                what: "cache",
                size: CACHE_SIZE,
            })?;
        blocks.resize(ARGON_MEMORY as usize, Block::new());

        let params = Params::new(ARGON_MEMORY, ARGON_ITERATIONS, ARGON_LANES, None)?;
        let argon = Argon2::new(Algorithm::Argon2d, Version::V0x13, params);
        argon.fill_memory(key, ARGON_SALT, &mut blocks[..])?;

        let mut programs = Vec::with_capacity(CACHE_ACCESSES);
        let mut gen = Blake2Generator::new(key, 0);
        for _ in 0..CACHE_ACCESSES {
            programs.push(ScProgram::generate(&mut gen));
        }

        debug!(
            "cache for key {} built in {}ms, superscalar sizes {:?}",
            byte_string::u8_array_to_string(key),
            start.elapsed().as_millis(),
            programs.iter().map(|p| p.instructions.len()).collect::<Vec<_>>(),
        );

        Ok(Cache {
            key: key.to_vec(),
            blocks,
            programs,
        })
    }

    /// 64-bit word `index` of the cache memory.
    pub fn word(&self, index: u64) -> u64 {
        self.blocks[(index / WORDS_PER_BLOCK) as usize].as_ref()[(index % WORDS_PER_BLOCK) as usize]
    }

    fn line(&self, reg_value: u64) -> &[u64] {
        let word = (reg_value & CACHE_LINE_MASK) * (CACHE_LINE_SIZE / 8);
        let offset = (word % WORDS_PER_BLOCK) as usize;
        &self.blocks[(word / WORDS_PER_BLOCK) as usize].as_ref()[offset..offset + 8]
    }

    pub fn init_dataset_item(&self, item_num: u64) -> [u64; 8] {
        let mut ds = [0; 8];

        let mut reg_value = item_num;
        ds[0] = (item_num + 1).wrapping_mul(SUPERSCALAR_MUL_0);
        ds[1] = ds[0] ^ SUPERSCALAR_ADD_1;
        ds[2] = ds[0] ^ SUPERSCALAR_ADD_2;
        ds[3] = ds[0] ^ SUPERSCALAR_ADD_3;
        ds[4] = ds[0] ^ SUPERSCALAR_ADD_4;
        ds[5] = ds[0] ^ SUPERSCALAR_ADD_5;
        ds[6] = ds[0] ^ SUPERSCALAR_ADD_6;
        ds[7] = ds[0] ^ SUPERSCALAR_ADD_7;

        for prog in &self.programs {
            prog.execute(&mut ds);

            for (v, mix_value) in ds.iter_mut().zip(self.line(reg_value)) {
                *v ^= mix_value;
            }
            reg_value = ds[prog.address_reg];
        }
        ds
    }
}

pub fn dataset_item_count() -> u64 {
    DATASET_ITEM_COUNT
}

/// Computes the items `start_item..` into `out`, eight words per item.
/// Items do not depend on each other, so any partition of the range gives
/// the same bytes.
pub fn init_dataset_range(cache: &Cache, start_item: u64, out: &mut [u64]) {
    for (i, item) in out.chunks_exact_mut(8).enumerate() {
        item.copy_from_slice(&cache.init_dataset_item(start_item + i as u64));
    }
}

/// The expanded 2GiB dataset. Read only once initialised.
pub struct Dataset {
    memory: PageBuffer,
}

impl Dataset {
    pub fn new(flags: Flags) -> Result<Dataset> {
        let size = (DATASET_ITEM_COUNT * CACHE_LINE_SIZE) as usize;
        Ok(Dataset {
            memory: PageBuffer::allocate(size, flags, "dataset")?,
        })
    }

    pub fn init_range(&mut self, cache: &Cache, start_item: u64, count: u64) {
        let from = (start_item * 8) as usize;
        let to = ((start_item + count) * 8) as usize;
        init_dataset_range(cache, start_item, &mut self.memory.as_u64_mut_slice()[from..to]);
    }

    /// Splits the item range into `threads` disjoint partitions and builds
    /// them concurrently. Each worker reports on a channel when done.
    pub fn init_parallel(&mut self, cache: &Cache, threads: usize) {
        let threads = threads.max(1);
        let start = Instant::now();
        let items_per_thread = (DATASET_ITEM_COUNT + threads as u64 - 1) / threads as u64;
        let words = self.memory.as_u64_mut_slice();
        let (done_sndr, done_rcvr) = unbounded();

        thread::scope(|scope| {
            for (ix, chunk) in words.chunks_mut((items_per_thread * 8) as usize).enumerate() {
                let done_sndr = done_sndr.clone();
                scope.spawn(move || {
                    let first = ix as u64 * items_per_thread;
                    let worker_start = Instant::now();
                    init_dataset_range(cache, first, chunk);
                    let _ = done_sndr.send((ix, chunk.len() / 8, worker_start.elapsed()));
                });
            }
            drop(done_sndr);
            for (ix, items, elapsed) in done_rcvr.iter() {
                debug!(
                    "dataset partition {} done: {} items in {}ms",
                    ix,
                    items,
                    elapsed.as_millis()
                );
            }
        });

        info!(
            "dataset init took {}ms with {} threads",
            start.elapsed().as_millis(),
            threads
        );
    }

    pub fn item(&self, item_num: u64) -> &[u64] {
        let from = (item_num * 8) as usize;
        &self.memory.as_u64_slice()[from..from + 8]
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    pub fn is_large_pages(&self) -> bool {
        self.memory.is_large_pages()
    }
}

/// Dataset access used by a VM: items are either looked up in the full
/// dataset or computed from the cache on every read.
#[derive(Clone)]
pub enum VmMemory {
    Light(Arc<Cache>),
    Full(Arc<Dataset>),
}

impl VmMemory {
    pub fn is_full(&self) -> bool {
        match *self {
            VmMemory::Full(_) => true,
            VmMemory::Light(_) => false,
        }
    }

    pub fn dataset_prefetch(&self, offset: u64) {
        if let VmMemory::Full(ref dataset) = *self {
            #[cfg(target_arch = "x86_64")]
            {
                let item = dataset.item(offset / CACHE_LINE_SIZE);
                unsafe {
                    _mm_prefetch(item.as_ptr() as *const i8, _MM_HINT_NTA);
                }
            }
            #[cfg(not(target_arch = "x86_64"))]
            let _ = (dataset, offset);
        }
    }

    pub fn dataset_read(&self, offset: u64, reg: &mut [u64; 8]) {
        let item_num = offset / CACHE_LINE_SIZE;
        match *self {
            VmMemory::Full(ref dataset) => {
                for (r, v) in reg.iter_mut().zip(dataset.item(item_num)) {
                    *r ^= v;
                }
            }
            VmMemory::Light(ref cache) => {
                let rl = cache.init_dataset_item(item_num);
                for (r, v) in reg.iter_mut().zip(rl.iter()) {
                    *r ^= v;
                }
            }
        }
    }
}

/// Keeps the cache and, in full mode, the dataset for the current seed
/// and rebuilds both when the seed rotates.
pub struct VmMemoryAllocator {
    pub vm_memory_seed: String,
    pub flags: Flags,
    pub threads: usize,
    pub cache: Option<Arc<Cache>>,
    pub dataset: Option<Arc<Dataset>>,
}

impl VmMemoryAllocator {
    pub fn initial(flags: Flags, threads: usize) -> VmMemoryAllocator {
        VmMemoryAllocator {
            vm_memory_seed: "".to_string(),
            flags,
            threads,
            cache: None,
            dataset: None,
        }
    }

    /// Returns `true` if the memory was rebuilt for a new seed.
    pub fn reallocate(&mut self, seed: String) -> Result<bool> {
        if self.cache.is_some() && seed == self.vm_memory_seed {
            return Ok(false);
        }
        let mem_init_start = Instant::now();
        let key = byte_string::string_to_u8_array(&seed)?;
        let cache = Arc::new(Cache::new(&key)?);
        self.dataset = if self.flags.contains(Flags::FULL_MEM) {
            let mut dataset = Dataset::new(self.flags)?;
            dataset.init_parallel(&cache, self.threads);
            Some(Arc::new(dataset))
        } else {
            None
        };
        self.cache = Some(cache);
        self.vm_memory_seed = seed;
        info!(
            "memory init took {}ms with seed_hash: {}",
            mem_init_start.elapsed().as_millis(),
            self.vm_memory_seed,
        );
        Ok(true)
    }

    pub fn get_memory(&self) -> Option<VmMemory> {
        match (&self.dataset, &self.cache) {
            (&Some(ref dataset), _) => Some(VmMemory::Full(dataset.clone())),
            (&None, &Some(ref cache)) => Some(VmMemory::Light(cache.clone())),
            (&None, &None) => None,
        }
    }
}
