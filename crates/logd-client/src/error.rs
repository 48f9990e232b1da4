use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The signed datagram exceeds the maximum packet size.
    #[error("datagram of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}
