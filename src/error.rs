use thiserror::Error;

/// Everything that can go wrong while parsing a header, unlocking a volume,
/// or reading from one.
#[derive(Error, Debug)]
pub enum Error {
    #[error("backing device I/O failed")]
    Io(#[from] std::io::Error),

    #[error("header does not start with a recognized LUKS signature")]
    UnsupportedSignature,

    #[error("unsupported LUKS format version {0} (only version 1 is unlocked)")]
    UnsupportedFormat(u16),

    #[error("header field violates a stated invariant: {0}")]
    CorruptHeader(&'static str),

    #[error("unsupported cipher/chaining/iv/hash combination: {0}")]
    UnsupportedAlgorithm(&'static str),

    #[error("key slot {slot} is corrupt: {reason}")]
    CorruptSlot { slot: usize, reason: &'static str },

    #[error("master key does not match the stored validation hash")]
    InvalidKey,

    #[error("invalid key size {0} (must be 16, 32, or 64 bytes)")]
    InvalidKeySize(usize),

    #[error("cipher primitive rejected the input")]
    CryptFailed,

    #[error("no key slot matched the supplied passphrase")]
    StillLocked,

    #[error("operation invalid in current state: {0}")]
    InvalidState(&'static str),

    #[error("operation aborted by signal_abort")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, Error>;
