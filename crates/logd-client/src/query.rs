use logd_types::{LogRecord, MAX_PACKET_SIZE};
use prost::Message;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

const BUFFERED_RECORDS: usize = 64;

/// Reads a query reply from `socket` until the end-of-stream marker.
///
/// A read timeout or socket error also ends the stream; neither is raised to
/// the consumer.
pub(crate) fn drive(socket: UdpSocket, read_deadline: Duration) -> ReceiverStream<LogRecord> {
    let (tx, rx) = mpsc::channel(BUFFERED_RECORDS);

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let mut received = 0usize;
        loop {
            let len = match timeout(read_deadline, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, received, "query read failed, ending stream");
                    break;
                }
                Err(_) => {
                    tracing::debug!(received, "query read deadline elapsed, ending stream");
                    break;
                }
            };

            let record = match LogRecord::decode(&buf[..len]) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undecodable reply");
                    continue;
                }
            };
            if record.is_end_of_stream() {
                break;
            }
            received += 1;
            if tx.send(record).await.is_err() {
                // Consumer dropped the stream.
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}
