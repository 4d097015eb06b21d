use thiserror::Error;

/// Reason a frame could not be constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("identifier {identifier:#X} exceeds the {} bound", id_width(.extended))]
    IdentifierOutOfRange { identifier: u32, extended: bool },
    #[error("payload of {0} bytes exceeds the 8 byte limit")]
    PayloadTooLong(usize),
    #[error("requested length {0} exceeds the 8 byte limit")]
    RequestedLengthTooLong(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanError {
    // Construction and validation errors
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),
    #[error("unsupported bitrate: {0} kbit/s")]
    UnsupportedBitrate(u32),

    // Adapter errors
    #[error("adapter enumeration failed: {0}")]
    EnumerationFailed(String),
    #[error("adapter {index} unavailable ({available} adapters present)")]
    AdapterUnavailable { index: usize, available: usize },
    #[error("device busy")]
    DeviceBusy,
    #[error("initialization failed: {0}")]
    InitFailed(String),

    // Channel errors
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("transport closed")]
    TransportClosed,

    // Receive loop errors
    #[error("receive loop already running")]
    AlreadyRunning,
}

fn id_width(extended: &bool) -> &'static str {
    if *extended {
        "29-bit"
    } else {
        "11-bit"
    }
}

pub type Result<T> = std::result::Result<T, CanError>;
