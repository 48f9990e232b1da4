//! Client for the logd daemon.
//!
//! A [`Client`] writes records, tails the live relay and runs historical
//! queries. Every outbound datagram is signed: writes and queries with the
//! write secret, `tail`/`ping` tokens with the read secret.
//!
//! ```no_run
//! # async fn demo() -> Result<(), logd_client::ClientError> {
//! use logd_client::{Client, ClientConfig};
//! use logd_types::{Level, LogRecord};
//!
//! let config = ClientConfig::new("127.0.0.1:6102".parse().unwrap(), "read", "write");
//! let client = Client::connect(config).await?;
//! client.write(&LogRecord::new("/prod/api/handler", Level::Info, "started")).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod query;
mod tail;

pub use error::ClientError;
pub use tail::Tail;

use logd_sign::Signer;
use logd_types::{Command, LogRecord, QueryParams, MAX_PACKET_SIZE, STATUS_TOKEN};
use prost::Message;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio_stream::wrappers::ReceiverStream;

/// Default deadline for each datagram of a query reply.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_millis(500);

/// Default heartbeat interval while tailing.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon UDP address.
    pub server: SocketAddr,
    pub read_secret: Vec<u8>,
    pub write_secret: Vec<u8>,
    /// Interval between `ping` tokens while tailing. Must stay below the
    /// daemon's eviction threshold.
    pub ping_period: Duration,
    /// How long a query waits for each reply datagram.
    pub read_deadline: Duration,
}

impl ClientConfig {
    pub fn new(
        server: SocketAddr,
        read_secret: impl Into<Vec<u8>>,
        write_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            server,
            read_secret: read_secret.into(),
            write_secret: write_secret.into(),
            ping_period: DEFAULT_PING_PERIOD,
            read_deadline: DEFAULT_READ_DEADLINE,
        }
    }
}

pub struct Client {
    config: ClientConfig,
    socket: UdpSocket,
    signer: Signer,
}

impl Client {
    /// Binds an ephemeral UDP socket connected to the daemon.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket cannot be bound or connected.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let socket = connected_socket(config.server).await?;
        Ok(Self {
            config,
            socket,
            signer: Signer::default(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a WRITE for `record`. Delivery is not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::TooLarge` if the signed datagram would not fit in
    /// one packet, or `ClientError::Io` if the send fails.
    pub async fn write(&self, record: &LogRecord) -> Result<(), ClientError> {
        let payload = Command::write(record.clone()).encode_to_vec();
        let signed = self.sign_checked(&self.config.write_secret, &payload)?;
        self.socket.send(&signed).await?;
        Ok(())
    }

    /// Bearer token for the daemon's `GET /status` route.
    ///
    /// Valid for the signature TTL, so mint one per request.
    pub fn status_token(&self) -> String {
        hex::encode(
            self.signer
                .sign(&self.config.read_secret, STATUS_TOKEN, SystemTime::now()),
        )
    }

    /// Runs a historical query on a fresh socket.
    ///
    /// The returned stream yields matching records in storage order and ends
    /// at the end-of-stream marker, on a read timeout, or on a socket error.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the query cannot be sent.
    pub async fn query(&self, params: QueryParams) -> Result<ReceiverStream<LogRecord>, ClientError> {
        let socket = connected_socket(self.config.server).await?;
        let payload = Command::query(params).encode_to_vec();
        let signed = self.sign_checked(&self.config.write_secret, &payload)?;
        socket.send(&signed).await?;
        Ok(query::drive(socket, self.config.read_deadline))
    }

    /// Subscribes to the live relay on a fresh socket.
    ///
    /// The subscription lasts until the returned [`Tail`] is dropped or
    /// cancelled, or until the daemon evicts it. Pings keep going while the
    /// consumer is slow to read.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the `tail` token cannot be sent.
    pub async fn tail(&self) -> Result<Tail, ClientError> {
        let socket = connected_socket(self.config.server).await?;
        Tail::start(
            socket,
            self.signer,
            self.config.read_secret.clone(),
            self.config.ping_period,
        )
        .await
    }

    fn sign_checked(&self, secret: &[u8], payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        let signed = self.signer.sign(secret, payload, SystemTime::now());
        if signed.len() > MAX_PACKET_SIZE {
            return Err(ClientError::TooLarge {
                size: signed.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(signed)
    }
}

async fn connected_socket(server: SocketAddr) -> Result<UdpSocket, ClientError> {
    let local = if server.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    Ok(socket)
}
