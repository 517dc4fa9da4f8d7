#![crate_name = "rxcore"]
#![crate_type = "lib"]
extern crate argon2;
extern crate blake2b_simd;
extern crate config;
extern crate crossbeam_channel;
extern crate dirs;
extern crate hex;
#[macro_use]
extern crate lazy_static;
extern crate libc;
#[macro_use]
extern crate log;
extern crate num_cpus;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate strum;
extern crate thiserror;

use std::sync::Arc;
use std::time::Instant;

pub mod byte_string;
pub mod engine_config;
pub mod error;
pub mod randomx;

pub use error::{Result, RxError};
pub use randomx::common::HASH_SIZE;
pub use randomx::flags::Flags;
pub use randomx::memory::{dataset_item_count, Cache, Dataset};
pub use randomx::vm::Vm;

/// Builds the cache for `seed`. The cache is shared by every VM and
/// dataset created from it and released with the last reference.
pub fn build_cache(seed: &[u8]) -> Result<Arc<Cache>> {
    Ok(Arc::new(Cache::new(seed)?))
}

/// Expands `cache` into a full dataset using `threads` workers.
pub fn extend_dataset(cache: &Cache, flags: Flags, threads: usize) -> Result<Arc<Dataset>> {
    let start = Instant::now();
    let mut dataset = Dataset::new(flags)?;
    dataset.init_parallel(cache, threads);
    debug!("dataset ready after {}ms", start.elapsed().as_millis());
    Ok(Arc::new(dataset))
}

/// Creates a VM. Flags inconsistent with the memory handed in are rejected
/// here rather than at hash time.
pub fn create_vm(cache: Option<Arc<Cache>>, dataset: Option<Arc<Dataset>>, flags: Flags) -> Result<Vm> {
    Vm::new(flags, cache, dataset)
}

pub fn hash(vm: &mut Vm, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
    vm.calculate_hash(input)
}
