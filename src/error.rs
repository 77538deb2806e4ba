use thiserror::Error;

/// Errors produced by the bridge datapath.
///
/// Variants fall into the classes the datapath keeps apart: programming and
/// invariant errors (fatal — continuing would produce unverifiable audio),
/// resource exhaustion (recoverable, caller applies backpressure), and input
/// validation (reported, nothing written). Transient signal-quality events
/// (late/missing frames, underruns) are never surfaced as errors; they are
/// handled in place and logged.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Datapath not initialized")]
    NotInitialized,

    #[error("Stream already running")]
    AlreadyRunning,

    #[error("Stream already stopped")]
    AlreadyStopped,

    #[error("FIFO accounting violated: {0}")]
    FifoAccounting(String),

    #[error("No free block in pool")]
    PoolExhausted,

    #[error("No ready block in queue")]
    Empty,

    #[error("Timed out waiting for block")]
    Timeout,

    #[error("Invalid bit depth: {0}")]
    InvalidBitDepth(u8),

    #[error("Size {size} is not divisible by {stride} (bytes per sample x channels)")]
    SizeMismatch { size: usize, stride: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Audio exchange error: {0}")]
    Exchange(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
