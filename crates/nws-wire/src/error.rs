use thiserror::Error;

/// Errors raised while decoding or encoding NWS wire frames.
///
/// Mirrors the teacher crate's one-variant-per-failure-class [`thiserror`]
/// enum (`smb/src/error.rs`), with `#[from]` conversions for the I/O layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("value of {0} bytes exceeds the configured spill threshold but no temp dir is writable: {1}")]
    SpillFailed(u64, std::io::Error),

    #[error("frame contained non-UTF8 bytes where a string was expected")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
