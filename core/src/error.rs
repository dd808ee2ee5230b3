use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModemError {
    #[error("No output sink attached")]
    NotReady,

    #[error("Modem is busy")]
    Busy,

    #[error("Already listening")]
    AlreadyListening,

    #[error("Input device error: {0}")]
    DeviceError(String),

    #[error("Cannot encode character {character:?} at position {position}")]
    EncodingError { character: char, position: usize },

    #[error("Invalid bit symbol {symbol:?} at position {position}")]
    DecodingError { symbol: char, position: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No async runtime available to drive timers")]
    NoRuntime,

    #[error("Input stream ended")]
    StreamEnded,
}

pub type Result<T> = std::result::Result<T, ModemError>;
