use std::path::{Path, PathBuf};

use config::{Config, Environment, File};

use byte_string;
use error::Result;
use randomx::cpu::CPU_FEATURES;
use randomx::flags::Flags;

pub const ENV_PREFIX: &str = "RXCORE";

fn default_true() -> bool {
    true
}

fn default_threads() -> usize {
    num_cpus::get()
}

fn default_key() -> String {
    //"test key 000"
    "74657374206b657920303030".to_string()
}

fn default_input() -> String {
    //"This is a test"
    "5468697320697320612074657374".to_string()
}

fn default_hashes() -> u64 {
    100
}

/// Engine switches and the bench workload. Read from an optional TOML
/// file, then overridden by `RXCORE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub large_pages: bool,
    #[serde(default)]
    pub one_gb_pages: bool,
    #[serde(default = "default_true")]
    pub hard_aes: bool,
    #[serde(default)]
    pub full_mem: bool,
    #[serde(default = "default_true")]
    pub jit: bool,
    /// Unset means detect from the CPU vendor.
    #[serde(default)]
    pub amd: Option<bool>,
    #[serde(default = "default_threads")]
    pub init_threads: usize,
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_hashes")]
    pub hashes: u64,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            large_pages: false,
            one_gb_pages: false,
            hard_aes: default_true(),
            full_mem: false,
            jit: default_true(),
            amd: None,
            init_threads: default_threads(),
            key: default_key(),
            input: default_input(),
            hashes: default_hashes(),
        }
    }
}

/// `<config dir>/rxcore/rxcore.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rxcore").join("rxcore.toml"))
}

impl EngineConfig {
    /// Loads `path`, or the default config path when `None`. A missing file
    /// is not an error.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("reading config from {}", path.display());
            builder = builder.add_source(File::from(path).required(false));
        }
        let conf = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(conf.try_deserialize()?)
    }

    pub fn flags(&self) -> Flags {
        let mut flags = Flags::DEFAULT;
        if self.large_pages {
            flags |= Flags::LARGE_PAGES;
        }
        if self.one_gb_pages {
            flags |= Flags::LARGE_PAGES | Flags::ONE_GB_PAGES;
        }
        if self.hard_aes {
            flags |= Flags::HARD_AES;
        }
        if self.full_mem {
            flags |= Flags::FULL_MEM;
        }
        if self.jit {
            flags |= Flags::JIT;
        }
        if self.amd.unwrap_or(CPU_FEATURES.amd) {
            flags |= Flags::AMD;
        }
        flags
    }

    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        byte_string::string_to_u8_array(&self.key)
    }

    pub fn input_bytes(&self) -> Result<Vec<u8>> {
        byte_string::string_to_u8_array(&self.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    #[test]
    fn test_defaults() {
        let conf = EngineConfig::default();
        assert!(conf.jit && conf.hard_aes && !conf.full_mem);
        assert!(conf.init_threads >= 1);
        assert_eq!(conf.key_bytes().unwrap(), b"test key 000".to_vec());
        assert_eq!(conf.input_bytes().unwrap(), b"This is a test".to_vec());
    }

    #[test]
    fn test_flags() {
        let conf = EngineConfig {
            one_gb_pages: true,
            hard_aes: false,
            full_mem: true,
            jit: false,
            amd: Some(true),
            ..EngineConfig::default()
        };
        let flags = conf.flags();
        assert!(flags.contains(Flags::LARGE_PAGES | Flags::ONE_GB_PAGES | Flags::FULL_MEM | Flags::AMD));
        assert!(!flags.contains(Flags::JIT));
        assert!(!flags.contains(Flags::HARD_AES));
    }

    #[test]
    fn test_load_file_and_environment() {
        let dir = env::temp_dir().join(format!("rxcore-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.toml");
        fs::write(&path, "full_mem = true\ninit_threads = 3\nkey = \"00ff\"\n").unwrap();

        let conf = EngineConfig::load(Some(&path)).unwrap();
        assert!(conf.full_mem);
        assert_eq!(conf.init_threads, 3);
        assert_eq!(conf.key_bytes().unwrap(), vec![0x00, 0xff]);
        assert!(conf.jit);

        env::set_var("RXCORE_INIT_THREADS", "5");
        let conf = EngineConfig::load(Some(&path)).unwrap();
        env::remove_var("RXCORE_INIT_THREADS");
        assert_eq!(conf.init_threads, 5);

        let missing = EngineConfig::load(Some(&dir.join("missing.toml"))).unwrap();
        assert!(!missing.full_mem);

        fs::remove_dir_all(&dir).unwrap();
    }
}
