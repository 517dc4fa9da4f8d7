use std::mem;
use std::sync::Arc;

use blake2b_simd::Params;

use super::bytecode::{self, Bytecode};
use super::common::{
    CACHE_LINE_ALIGN_MASK, HASH_SIZE, PROGRAM_COUNT, PROGRAM_ITERATIONS, REGISTERS_COUNT,
    REGISTER_COUNT_FLT, SCRATCHPAD_L3, SCRATCHPAD_L3_MASK64,
};
use super::flags::Flags;
use super::float::RoundingMode;
use super::hash::AesImpl;
#[cfg(all(target_arch = "x86_64", unix))]
use super::jit::{DatasetAccess, JitCompiler, JitContext, LightContext};
use super::memory::{Cache, Dataset, VmMemory};
use super::pages::PageBuffer;
use super::program::{Program, ProgramConfiguration, RegisterFile};
use error::{Result, RxError};

/// True when this build carries a native code generator.
pub fn jit_supported() -> bool {
    cfg!(all(target_arch = "x86_64", unix))
}

fn blake2b_512(input: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(Params::new().hash_length(64).hash(input).as_bytes());
    out
}

/// Scratchpads use 2MiB pages at most, 1GiB pages are for the dataset.
fn scratchpad_flags(flags: Flags) -> Flags {
    let mut sp_flags = flags;
    sp_flags.remove(Flags::ONE_GB_PAGES);
    sp_flags
}

enum Strategy {
    Interpreted {
        rounding: RoundingMode,
    },
    #[cfg(all(target_arch = "x86_64", unix))]
    Compiled {
        jit: Box<JitCompiler>,
        mxcsr: u32,
    },
}

impl Strategy {
    fn reset_rounding_mode(&mut self) {
        match *self {
            Strategy::Interpreted { ref mut rounding } => *rounding = RoundingMode::Nearest,
            #[cfg(all(target_arch = "x86_64", unix))]
            Strategy::Compiled { ref mut mxcsr, .. } => *mxcsr = RoundingMode::Nearest.mxcsr(),
        }
    }
}

/// One hashing context. Owns its scratchpad and registers, shares the cache
/// or dataset with other VMs. Not for concurrent use.
pub struct Vm {
    flags: Flags,
    aes: AesImpl,
    scratchpad: PageBuffer,
    reg: RegisterFile,
    memory: VmMemory,
    strategy: Strategy,
    temp_hash: [u8; 64],
}

impl Vm {
    /// Creates a VM for `flags`. `FULL_MEM` needs a dataset, light mode a
    /// cache. With `JIT` set on a build without a code generator the VM
    /// falls back to the interpreter.
    pub fn new(flags: Flags, cache: Option<Arc<Cache>>, dataset: Option<Arc<Dataset>>) -> Result<Vm> {
        let memory = if flags.contains(Flags::FULL_MEM) {
            match dataset {
                Some(dataset) => VmMemory::Full(dataset),
                None => return Err(RxError::ConfigurationMismatch("full memory mode without a dataset")),
            }
        } else {
            match cache {
                Some(cache) => VmMemory::Light(cache),
                None => return Err(RxError::ConfigurationMismatch("light mode without a cache")),
            }
        };

        let strategy = if flags.contains(Flags::JIT) {
            Vm::compiled_strategy(flags)?
        } else {
            Strategy::Interpreted {
                rounding: RoundingMode::Nearest,
            }
        };

        let aes = AesImpl::select(flags.contains(Flags::HARD_AES));
        if flags.contains(Flags::HARD_AES) && aes == AesImpl::Soft {
            info!("hardware AES requested but not available, using table AES");
        }

        let vm = Vm {
            flags,
            aes,
            scratchpad: PageBuffer::allocate(SCRATCHPAD_L3 as usize, scratchpad_flags(flags), "scratchpad")?,
            reg: RegisterFile::default(),
            memory,
            strategy,
            temp_hash: [0; 64],
        };
        debug!(
            "vm created: flags {:?}, compiled {}, large pages {}",
            vm.flags,
            vm.is_compiled(),
            vm.scratchpad.is_large_pages()
        );
        Ok(vm)
    }

    /// Like `new` with `JIT` forced on, failing instead of falling back.
    pub fn new_compiled(flags: Flags, cache: Option<Arc<Cache>>, dataset: Option<Arc<Dataset>>) -> Result<Vm> {
        if !jit_supported() {
            return Err(RxError::UnsupportedPlatform);
        }
        Vm::new(flags | Flags::JIT, cache, dataset)
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    fn compiled_strategy(flags: Flags) -> Result<Strategy> {
        Ok(Strategy::Compiled {
            jit: Box::new(JitCompiler::new(flags)?),
            mxcsr: RoundingMode::Nearest.mxcsr(),
        })
    }

    #[cfg(not(all(target_arch = "x86_64", unix)))]
    fn compiled_strategy(_flags: Flags) -> Result<Strategy> {
        info!("no code generator for this platform, using the interpreter");
        Ok(Strategy::Interpreted {
            rounding: RoundingMode::Nearest,
        })
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_compiled(&self) -> bool {
        match self.strategy {
            Strategy::Interpreted { .. } => false,
            #[cfg(all(target_arch = "x86_64", unix))]
            Strategy::Compiled { .. } => true,
        }
    }

    /// Register state after the last program of the last hash.
    pub fn register_file(&self) -> &RegisterFile {
        &self.reg
    }

    /// Points a light mode VM at a cache for a new seed. Full memory VMs read
    /// only the dataset and keep their memory.
    pub fn set_cache(&mut self, cache: Arc<Cache>) {
        if !self.memory.is_full() {
            self.memory = VmMemory::Light(cache);
        }
    }

    pub fn set_dataset(&mut self, dataset: Arc<Dataset>) -> Result<()> {
        if !self.memory.is_full() {
            return Err(RxError::ConfigurationMismatch("dataset given to a light mode vm"));
        }
        self.memory = VmMemory::Full(dataset);
        Ok(())
    }

    pub fn calculate_hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
        self.strategy.reset_rounding_mode();
        let mut temp_hash = blake2b_512(input);
        self.aes.fill_aes_1rx4(&mut temp_hash, self.scratchpad.as_mut_slice());
        self.run_chain(temp_hash)?;
        let a = self.aes.hash_aes_1rx4(self.scratchpad.as_slice());
        Ok(self.finish(&a))
    }

    /// Starts a pipelined sequence: prepares the scratchpad for `input`.
    pub fn calculate_hash_first(&mut self, input: &[u8]) {
        self.temp_hash = blake2b_512(input);
        self.aes.fill_aes_1rx4(&mut self.temp_hash, self.scratchpad.as_mut_slice());
    }

    /// Returns the digest of the previous input and prepares the scratchpad
    /// for `next_input`, fusing the final scratchpad hash with the next fill.
    pub fn calculate_hash_next(&mut self, next_input: &[u8]) -> Result<[u8; HASH_SIZE]> {
        self.strategy.reset_rounding_mode();
        let temp_hash = self.temp_hash;
        self.run_chain(temp_hash)?;
        self.temp_hash = blake2b_512(next_input);
        let a = self
            .aes
            .hash_and_fill_aes_1rx4(self.scratchpad.as_mut_slice(), &mut self.temp_hash);
        Ok(self.finish(&a))
    }

    /// Returns the digest of the last input given to `calculate_hash_first`
    /// or `calculate_hash_next`.
    pub fn calculate_hash_last(&mut self) -> Result<[u8; HASH_SIZE]> {
        self.strategy.reset_rounding_mode();
        let temp_hash = self.temp_hash;
        self.run_chain(temp_hash)?;
        let a = self.aes.hash_aes_1rx4(self.scratchpad.as_slice());
        Ok(self.finish(&a))
    }

    /// Runs all programs; each program seed is the hash of the previous
    /// program's register file.
    fn run_chain(&mut self, mut temp_hash: [u8; 64]) -> Result<()> {
        for _ in 0..PROGRAM_COUNT - 1 {
            self.run(&temp_hash)?;
            temp_hash = blake2b_512(&self.reg.to_bytes());
        }
        self.run(&temp_hash)
    }

    fn finish(&mut self, scratchpad_hash: &[u8; 64]) -> [u8; HASH_SIZE] {
        self.reg.set_a_bytes(scratchpad_hash);
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(
            Params::new()
                .hash_length(HASH_SIZE)
                .hash(&self.reg.to_bytes())
                .as_bytes(),
        );
        out
    }

    fn run(&mut self, seed: &[u8; 64]) -> Result<()> {
        let program = Program::generate(self.aes, seed);
        let config = program.configuration();
        let code = Bytecode::compile(&program.instructions);
        self.reg.r = [0; REGISTERS_COUNT];
        self.reg.a = program.a_registers();

        match self.strategy {
            Strategy::Interpreted { ref mut rounding } => {
                execute_interpreted(
                    &code,
                    &program,
                    &config,
                    &mut self.reg,
                    self.scratchpad.as_mut_slice(),
                    &self.memory,
                    rounding,
                );
                Ok(())
            }
            #[cfg(all(target_arch = "x86_64", unix))]
            Strategy::Compiled {
                ref mut jit,
                ref mut mxcsr,
            } => {
                let mem_regs = program.memory_registers();
                let light;
                let (access, memory) = match self.memory {
                    VmMemory::Full(ref dataset) => (
                        DatasetAccess::Full,
                        dataset.as_ptr().wrapping_add(program.dataset_offset() as usize),
                    ),
                    VmMemory::Light(ref cache) => {
                        light = LightContext {
                            cache: &**cache,
                            dataset_offset: program.dataset_offset(),
                        };
                        (DatasetAccess::Light, &light as *const LightContext as *const u8)
                    }
                };
                jit.compile(&code, &config, access)?;

                let mut ctx = JitContext {
                    mx: mem_regs.mx,
                    ma: mem_regs.ma,
                    memory,
                    e_mask: config.e_mask,
                    vm_mxcsr: *mxcsr,
                    host_mxcsr: 0,
                };
                unsafe {
                    jit.run(&mut self.reg, &mut ctx, self.scratchpad.as_mut_ptr(), PROGRAM_ITERATIONS);
                }
                *mxcsr = ctx.vm_mxcsr;
                Ok(())
            }
        }
    }
}

/// The iteration loop of one program, executed by the interpreter.
fn execute_interpreted(
    code: &Bytecode,
    program: &Program,
    config: &ProgramConfiguration,
    reg: &mut RegisterFile,
    scratchpad: &mut [u8],
    memory: &VmMemory,
    rounding: &mut RoundingMode,
) {
    let mem_regs = program.memory_registers();
    let dataset_offset = program.dataset_offset();
    let [rr0, rr1, rr2, rr3] = config.read_reg;
    let mut mx = mem_regs.mx as u64;
    let mut ma = mem_regs.ma as u64;
    let mut sp_addr0 = mx;
    let mut sp_addr1 = ma;

    for _ in 0..PROGRAM_ITERATIONS {
        let sp_mix = reg.r[rr0] ^ reg.r[rr1];
        sp_addr0 = (sp_addr0 ^ sp_mix) & SCRATCHPAD_L3_MASK64;
        sp_addr1 = (sp_addr1 ^ (sp_mix >> 32)) & SCRATCHPAD_L3_MASK64;
        let (a0, a1) = (sp_addr0 as usize, sp_addr1 as usize);

        for (i, r) in reg.r.iter_mut().enumerate() {
            *r ^= bytecode::load64(scratchpad, a0 + 8 * i);
        }
        for i in 0..REGISTER_COUNT_FLT {
            reg.f[i] = bytecode::load_cvt(scratchpad, a1 + 8 * i);
        }
        for i in 0..REGISTER_COUNT_FLT {
            reg.e[i] = bytecode::mask_exponent_mantissa(
                bytecode::load_cvt(scratchpad, a1 + 8 * (REGISTER_COUNT_FLT + i)),
                config.e_mask,
            );
        }

        code.execute(reg, scratchpad, config.e_mask, rounding);

        mx ^= (reg.r[rr2] ^ reg.r[rr3]) & 0xFFFF_FFFF;
        mx &= CACHE_LINE_ALIGN_MASK;
        memory.dataset_prefetch(dataset_offset + mx);
        memory.dataset_read(dataset_offset + ma, &mut reg.r);
        mem::swap(&mut mx, &mut ma);

        for (i, r) in reg.r.iter().enumerate() {
            scratchpad[a1 + 8 * i..a1 + 8 * i + 8].copy_from_slice(&r.to_le_bytes());
        }
        for i in 0..REGISTER_COUNT_FLT {
            for lane in 0..2 {
                let bits = reg.f[i][lane].to_bits() ^ reg.e[i][lane].to_bits();
                reg.f[i][lane] = f64::from_bits(bits);
                let at = a0 + 16 * i + 8 * lane;
                scratchpad[at..at + 8].copy_from_slice(&bits.to_le_bytes());
            }
        }

        sp_addr0 = 0;
        sp_addr1 = 0;
    }
}
