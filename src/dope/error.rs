use thiserror::Error;

/// Failure modes raised by the DOPE envelope (spec §4.1, §7 crypto domain).
#[derive(Debug, Error)]
pub enum DopeError {
    #[error("unsupported DOPE configuration: {0}")]
    UnsupportedConfig(String),

    #[error("key verification failed")]
    KeyVerification,

    #[error("ratchet counter exhausted")]
    KeysExhausted,

    #[error("AEAD authentication failed")]
    AuthFailed,

    #[error("BCH correction failed: corruption beyond ecc capacity")]
    CorruptionBeyondBCH,

    #[error("malformed key descriptor: {0}")]
    MalformedKeyDescriptor(String),

    #[error("malformed packet bundle: {0}")]
    MalformedBundle(String),
}

pub type Result<T> = std::result::Result<T, DopeError>;
