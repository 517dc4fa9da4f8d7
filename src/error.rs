use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RxError {
    #[error("failed to allocate {size} bytes for {what}")]
    AllocationFailure { what: &'static str, size: usize },
    #[error("no native code generator for this platform")]
    UnsupportedPlatform,
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(&'static str),
    #[error("cache fill failed: {0}")]
    Argon2(#[from] argon2::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

pub type Result<T> = result::Result<T, RxError>;
