use logd_sign::Signer;
use logd_types::{LogRecord, MAX_PACKET_SIZE, PING_TOKEN, TAIL_TOKEN};
use prost::Message;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

const BUFFERED_RECORDS: usize = 256;

/// A live subscription to relayed records.
///
/// Yields every record the daemon relays, including its own notices (key
/// `//logd`). Pings run on their own task, so a consumer that stops reading
/// does not get the subscription evicted. If the daemon evicts it anyway,
/// the kick notice is yielded and the stream ends.
pub struct Tail {
    records: ReceiverStream<LogRecord>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
}

impl Tail {
    pub(crate) async fn start(
        socket: UdpSocket,
        signer: Signer,
        read_secret: Vec<u8>,
        ping_period: Duration,
    ) -> Result<Self, ClientError> {
        socket
            .send(&signer.sign(&read_secret, TAIL_TOKEN, SystemTime::now()))
            .await?;

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(BUFFERED_RECORDS);
        let cancel = CancellationToken::new();
        tokio::spawn(ping(
            Arc::clone(&socket),
            signer,
            read_secret,
            ping_period,
            cancel.clone(),
        ));
        tokio::spawn(relay(Arc::clone(&socket), tx, cancel.clone()));

        Ok(Self {
            records: ReceiverStream::new(rx),
            socket,
            cancel,
        })
    }

    /// Address the daemon knows this subscription by.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Stops pinging and ends the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for Tail {
    type Item = LogRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.records).poll_next(cx)
    }
}

impl Drop for Tail {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn ping(
    socket: Arc<UdpSocket>,
    signer: Signer,
    read_secret: Vec<u8>,
    ping_period: Duration,
    cancel: CancellationToken,
) {
    let mut pings = interval_at(Instant::now() + ping_period, ping_period);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = pings.tick() => {}
        }
        let ping = signer.sign(&read_secret, PING_TOKEN, SystemTime::now());
        if let Err(e) = socket.send(&ping).await {
            tracing::warn!(error = %e, "failed to send ping");
        }
    }
}

async fn relay(socket: Arc<UdpSocket>, tx: mpsc::Sender<LogRecord>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let len = tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => match received {
                Ok(len) => len,
                Err(e) => {
                    tracing::debug!(error = %e, "tail read failed");
                    continue;
                }
            },
        };
        let record = match LogRecord::decode(&buf[..len]) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable relay");
                continue;
            }
        };

        let kicked = record.is_kick_notice();
        if kicked {
            tracing::warn!(notice = %record.text, "evicted by daemon, ending tail");
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            sent = tx.send(record) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        if kicked {
            // Stops the pinger too.
            cancel.cancel();
            break;
        }
    }
}
