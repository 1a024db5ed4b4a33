use thiserror::Error;

/// The primary error type for the `pulselink` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("timeout during transport operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("not connected")]
    NotConnected,

    #[error("missing GATT characteristic: {0}")]
    CharacteristicMissing(&'static str),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("transmission failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}
