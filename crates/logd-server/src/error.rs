use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by the UDP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening socket could not be bound. Fatal at startup.
    #[error("failed to bind udp socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// An outbound datagram did not complete within the write timeout.
    #[error("send to {0} timed out")]
    WriteTimeout(SocketAddr),
}
