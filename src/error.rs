use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the charger link and the session engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The charger could not be found or did not answer the probe.
    #[error("failed to connect to charger: {0}")]
    ConnectFailed(String),

    /// A response failed verification (CRC, block checksum, echo or length).
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// A caller-supplied value is out of range for the field it targets.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// The distinct ways a charger response can fail verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{context}: bad CRC: {actual:#06x} != {expected:#06x}")]
    Crc {
        context: &'static str,
        expected: u16,
        actual: u16,
    },

    #[error("preset block {block} checksum failed: {actual:#06x} != {expected:#06x}")]
    Checksum {
        block: usize,
        expected: u16,
        actual: u16,
    },

    #[error("{context}: short response: got {actual} of {expected} bytes")]
    Short {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{context}: response did not echo the command")]
    EchoMismatch { context: &'static str },
}

impl Error {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
