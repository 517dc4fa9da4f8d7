pub mod blake2_generator;
pub mod bytecode;
pub mod common;
pub mod cpu;
pub mod flags;
pub mod float;
pub mod hash;
#[cfg(all(target_arch = "x86_64", unix))]
pub mod jit;
pub mod m128;
pub mod memory;
pub mod pages;
pub mod program;
pub mod superscalar;
pub mod vm;

use std::sync::Arc;

use self::common::HASH_SIZE;
use self::memory::{Cache, Dataset};
use self::vm::Vm;
use error::Result;

/// The interface shared by every VM strategy
pub trait RandomXVM {
    /// Calculates a RandomX hash for the given input bytes
    fn calculate_hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]>;

    /// Switches to the cache of a new seed
    fn set_cache(&mut self, cache: Arc<Cache>);

    /// Switches to the dataset of a new seed (full memory mode only)
    fn set_dataset(&mut self, dataset: Arc<Dataset>) -> Result<()>;
}

// Implement the RandomXVM trait for the Vm struct
impl RandomXVM for Vm {
    fn calculate_hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
        self.calculate_hash(input)
    }

    fn set_cache(&mut self, cache: Arc<Cache>) {
        self.set_cache(cache)
    }

    fn set_dataset(&mut self, dataset: Arc<Dataset>) -> Result<()> {
        self.set_dataset(dataset)
    }
}
