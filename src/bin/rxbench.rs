extern crate env_logger;
#[macro_use]
extern crate log;
extern crate rxcore;

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use rxcore::byte_string;
use rxcore::engine_config::EngineConfig;
use rxcore::randomx::memory::VmMemoryAllocator;
use rxcore::{create_vm, Result};

const HASHRATE_DISPLAY_INTERVAL: Duration = Duration::from_millis(1000);

/// Hashes `input` with a rolling 4 byte nonce appended, reporting the rate.
fn run(conf: &EngineConfig) -> Result<()> {
    let flags = conf.flags();
    info!("flags: {:?}, init threads: {}", flags, conf.init_threads);

    let mut allocator = VmMemoryAllocator::initial(flags, conf.init_threads);
    allocator.reallocate(conf.key.clone())?;
    let mut vm = create_vm(allocator.cache.clone(), allocator.dataset.clone(), flags)?;
    info!("vm ready, compiled: {}", vm.is_compiled());

    let mut blob = conf.input_bytes()?;
    let nonce_at = blob.len();
    blob.extend_from_slice(&[0; 4]);

    let start = Instant::now();
    let mut last_time = start;
    let mut last_count = 0;

    vm.calculate_hash_first(&blob);
    for nonce in 1..=conf.hashes {
        blob[nonce_at..].copy_from_slice(&(nonce as u32).to_le_bytes());
        let digest = if nonce == conf.hashes {
            vm.calculate_hash_last()?
        } else {
            vm.calculate_hash_next(&blob)?
        };
        trace!("nonce {} -> {}", nonce - 1, byte_string::u8_array_to_string(&digest));

        let now = Instant::now();
        let elapsed = now.duration_since(last_time);
        if elapsed >= HASHRATE_DISPLAY_INTERVAL {
            let hash_diff = nonce - last_count;
            info!(
                "hashrate: {:.2} H/s ({} hashes in {:.1}s)",
                hash_diff as f64 / elapsed.as_secs_f64(),
                hash_diff,
                elapsed.as_secs_f64()
            );
            last_time = now;
            last_count = nonce;
        }
    }

    let total = start.elapsed().as_secs_f64();
    info!(
        "{} hashes in {:.1}s, {:.2} H/s",
        conf.hashes,
        total,
        conf.hashes as f64 / total
    );
    Ok(())
}

fn main() {
    env_logger::init();

    let path = env::args().nth(1).map(PathBuf::from);
    let conf = match EngineConfig::load(path.as_ref().map(|p| p.as_path())) {
        Ok(conf) => conf,
        Err(err) => {
            error!("could not load config: {}", err);
            process::exit(2);
        }
    };
    if conf.hashes == 0 {
        info!("nothing to do, hashes = 0");
        return;
    }

    if let Err(err) = run(&conf) {
        error!("{}", err);
        process::exit(1);
    }
}
