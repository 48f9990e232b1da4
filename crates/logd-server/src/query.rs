//! Streams historical records back to a querier.
//!
//! Each matching record goes out as its own datagram in storage order,
//! followed by the end-of-stream sentinel. There is no acknowledgement; the
//! querier reads until the sentinel or its own deadline.

use logd_sign::pack;
use logd_types::{LogRecord, QueryParams, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;

pub(crate) async fn respond(
    transport: &Transport,
    params: QueryParams,
    addr: SocketAddr,
    cancel: &CancellationToken,
) {
    let store = transport.store();
    let records = match tokio::task::spawn_blocking(move || store.query(&params)).await {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            tracing::error!(remote_addr = %addr, error = %e, "query failed");
            return;
        }
        Err(e) => {
            tracing::error!(remote_addr = %addr, error = %e, "query task failed");
            return;
        }
    };

    let mut sent = 0usize;
    for record in &records {
        if cancel.is_cancelled() {
            tracing::debug!(remote_addr = %addr, sent, "query reply interrupted by shutdown");
            return;
        }
        let packet = pack(record);
        if packet.len() > MAX_PACKET_SIZE {
            tracing::warn!(
                remote_addr = %addr,
                key = %record.key,
                size = packet.len(),
                "skipping record too large for one datagram"
            );
            continue;
        }
        if let Err(e) = transport.send_to(&packet, addr).await {
            tracing::debug!(remote_addr = %addr, error = %e, sent, "query reply aborted");
            return;
        }
        sent += 1;
    }

    if let Err(e) = transport
        .send_to(&pack(&LogRecord::end_of_stream()), addr)
        .await
    {
        tracing::debug!(remote_addr = %addr, error = %e, "failed to send end of stream");
        return;
    }
    tracing::debug!(remote_addr = %addr, records = sent, "query answered");
}
