use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filter failed at frame {frame_index}: {message}")]
    Predicate { frame_index: usize, message: String },

    #[error("Page frame source error: {0}")]
    FrameSource(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Reduce queue of shard {shard} stayed saturated for {waited_ms} ms")]
    QueueSaturated { shard: usize, waited_ms: u128 },
}

pub type Result<T> = std::result::Result<T, ScanError>;
