//! UDP transport: receive loop, data-plane dispatcher, fan-out and sweep.
//!
//! Every inbound datagram is a signed envelope. The literal `tail` and `ping`
//! tokens are verified against the read secret and handled on short-lived
//! tasks; everything else is queued for a single dispatcher that verifies
//! against the write secret, decodes the command and applies it. Running
//! WRITEs through one dispatcher keeps relayed records in arrival order.
//!
//! Freshness is judged at arrival. Time spent waiting in the inbound queue
//! does not count against the signature TTL.

use futures_util::future::join_all;
use logd_db::LogStore;
use logd_sign::{pack, unpack, Signer, SIGNATURE_LEN};
use logd_types::{
    partition_key, Command, LogRecord, Name, MAX_PACKET_SIZE, PING_TOKEN, STATUS_TOKEN,
    TAIL_TOKEN,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::guard::DedupFilter;
use crate::query;
use crate::registry::{Registration, SubscriberRegistry};
use crate::stats::{DropReason, Stats};

/// Runtime settings for a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub read_secret: Vec<u8>,
    pub write_secret: Vec<u8>,
    pub sig_ttl: Duration,
    pub ping_period: Duration,
    pub missed_pings_allowed: u32,
    pub write_timeout: Duration,
    pub inbound_queue: usize,
    pub fanout_queue: usize,
    pub max_inflight: usize,
    pub max_subscribers: usize,
}

impl TransportSettings {
    /// Default settings with the given secrets.
    pub fn new(read_secret: impl Into<Vec<u8>>, write_secret: impl Into<Vec<u8>>) -> Self {
        let mut settings = Self::from(&TransportConfig::default());
        settings.read_secret = read_secret.into();
        settings.write_secret = write_secret.into();
        settings
    }

    /// Silence after which a subscriber is evicted.
    pub fn eviction_threshold(&self) -> Duration {
        self.ping_period * self.missed_pings_allowed
    }
}

impl From<&TransportConfig> for TransportSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            read_secret: config.read_secret.as_bytes().to_vec(),
            write_secret: config.write_secret.as_bytes().to_vec(),
            sig_ttl: config.sig_ttl(),
            ping_period: config.ping_period().max(Duration::from_millis(1)),
            missed_pings_allowed: config.missed_pings_allowed,
            write_timeout: config.write_timeout(),
            inbound_queue: config.inbound_queue.max(1),
            fanout_queue: config.fanout_queue.max(1),
            max_inflight: config.max_inflight.max(1),
            max_subscribers: config.max_subscribers,
        }
    }
}

/// A datagram queued for the dispatcher.
struct Inbound {
    packet: Vec<u8>,
    addr: SocketAddr,
    received_at: SystemTime,
    arrived: Instant,
}

struct Inner {
    socket: UdpSocket,
    settings: TransportSettings,
    signer: Signer,
    registry: SubscriberRegistry,
    store: Arc<dyn LogStore>,
    guard: Arc<dyn DedupFilter>,
    stats: Arc<Stats>,
    inflight: Arc<Semaphore>,
}

/// Handle to a bound transport. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Binds the UDP socket.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Bind` if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        settings: TransportSettings,
        store: Arc<dyn LogStore>,
        guard: Arc<dyn DedupFilter>,
        stats: Arc<Stats>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;

        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                signer: Signer::new(settings.sig_ttl),
                registry: SubscriberRegistry::new(settings.max_subscribers),
                inflight: Arc::new(Semaphore::new(settings.max_inflight)),
                settings,
                store,
                guard,
                stats,
            }),
        })
    }

    /// # Errors
    ///
    /// Returns `TransportError::Io` if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.inner.registry
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.inner.stats
    }

    pub(crate) fn store(&self) -> Arc<dyn LogStore> {
        Arc::clone(&self.inner.store)
    }

    /// Checks a status bearer token: a hex envelope over `status`, signed
    /// with the read secret and fresh at `now`.
    pub(crate) fn authorize_status(&self, token: &str, now: SystemTime) -> bool {
        let Ok(signed) = hex::decode(token) else {
            return false;
        };
        let Ok(envelope) = unpack(&signed) else {
            return false;
        };
        envelope.payload == STATUS_TOKEN
            && self
                .inner
                .signer
                .verify(&self.inner.settings.read_secret, &envelope, now)
                .is_ok()
    }

    /// Runs every transport loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let settings = &self.inner.settings;
        let (data_tx, data_rx) = mpsc::channel(settings.inbound_queue);
        let (fanout_tx, fanout_rx) = mpsc::channel(settings.fanout_queue);

        if let Ok(addr) = self.local_addr() {
            tracing::info!(
                %addr,
                ping_period_ms = settings.ping_period.as_millis() as u64,
                missed_pings_allowed = settings.missed_pings_allowed,
                "udp transport running"
            );
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(self.clone().receive_loop(data_tx, cancel.clone()));
        tasks.spawn(
            self.clone()
                .dispatch_loop(data_rx, fanout_tx.clone(), cancel.clone()),
        );
        tasks.spawn(
            self.clone()
                .send_loop(fanout_rx, fanout_tx.clone(), cancel.clone()),
        );
        tasks.spawn(self.clone().sweep_loop(fanout_tx, cancel.clone()));

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "transport task failed");
                cancel.cancel();
            }
        }

        tracing::info!("udp transport stopped");
    }

    /// Sends one datagram, bounded by the write timeout.
    pub(crate) async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
        match timeout(
            self.inner.settings.write_timeout,
            self.inner.socket.send_to(packet, addr),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::WriteTimeout(addr)),
        }
    }

    async fn notify(&self, addr: SocketAddr, text: &str) {
        let packet = pack(&LogRecord::notice(text));
        if let Err(e) = self.send_to(&packet, addr).await {
            tracing::debug!(remote_addr = %addr, error = %e, "failed to deliver notice");
        }
    }

    async fn receive_loop(self, data_tx: mpsc::Sender<Inbound>, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, addr) = tokio::select! {
                () = cancel.cancelled() => break,
                received = self.inner.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!(error = %e, "udp receive failed");
                        continue;
                    }
                },
            };
            let received_at = SystemTime::now();
            let arrived = Instant::now();
            let datagram = &buf[..len];

            let envelope = match unpack(datagram) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.inner.stats.record_drop(DropReason::Malformed);
                    tracing::debug!(remote_addr = %addr, error = %e, "dropping malformed datagram");
                    continue;
                }
            };

            if envelope.payload == TAIL_TOKEN || envelope.payload == PING_TOKEN {
                let Ok(permit) = Arc::clone(&self.inner.inflight).try_acquire_owned() else {
                    self.inner.stats.record_drop(DropReason::QueueFull);
                    tracing::warn!(remote_addr = %addr, "handler budget exhausted, dropping control token");
                    continue;
                };
                let transport = self.clone();
                let packet = datagram.to_vec();
                tokio::spawn(async move {
                    let _permit = permit;
                    transport.handle_control(&packet, addr, received_at).await;
                });
                continue;
            }

            match data_tx.try_send(Inbound {
                packet: datagram.to_vec(),
                addr,
                received_at,
                arrived,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.inner.stats.record_drop(DropReason::QueueFull);
                    tracing::warn!(remote_addr = %addr, "inbound queue full, dropping datagram");
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
    }

    async fn handle_control(&self, packet: &[u8], addr: SocketAddr, received_at: SystemTime) {
        let Ok(envelope) = unpack(packet) else {
            return;
        };
        if let Err(e) =
            self.inner
                .signer
                .verify(&self.inner.settings.read_secret, &envelope, received_at)
        {
            self.inner.stats.record_drop(DropReason::Unauthorized);
            tracing::warn!(remote_addr = %addr, error = %e, "rejected control token");
            return;
        }

        let registry = &self.inner.registry;
        let now = Instant::now();
        if envelope.payload == TAIL_TOKEN {
            match registry.register(addr, now) {
                Registration::New => {
                    tracing::info!(remote_addr = %addr, subscribers = registry.len(), "tailer joined");
                    self.notify(addr, "tailing started").await;
                }
                Registration::Refreshed => {
                    tracing::debug!(remote_addr = %addr, "tailer re-registered");
                    self.notify(addr, "tailing started").await;
                }
                Registration::Full => {
                    tracing::warn!(
                        remote_addr = %addr,
                        max_subscribers = self.inner.settings.max_subscribers,
                        "subscriber limit reached, ignoring tail"
                    );
                }
            }
        } else if !registry.refresh(addr, now) {
            tracing::debug!(remote_addr = %addr, "ping from unknown address ignored");
        }
    }

    async fn dispatch_loop(
        self,
        mut data_rx: mpsc::Receiver<Inbound>,
        fanout_tx: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
    ) {
        loop {
            let inbound = tokio::select! {
                () = cancel.cancelled() => break,
                next = data_rx.recv() => match next {
                    Some(inbound) => inbound,
                    None => break,
                },
            };
            self.dispatch(inbound, &fanout_tx, &cancel).await;
        }
    }

    async fn dispatch(
        &self,
        inbound: Inbound,
        fanout_tx: &mpsc::Sender<Vec<u8>>,
        cancel: &CancellationToken,
    ) {
        let addr = inbound.addr;
        let Ok(envelope) = unpack(&inbound.packet) else {
            return;
        };
        if let Err(e) = self.inner.signer.verify(
            &self.inner.settings.write_secret,
            &envelope,
            inbound.received_at,
        ) {
            self.inner.stats.record_drop(DropReason::Unauthorized);
            tracing::warn!(remote_addr = %addr, error = %e, "rejected command");
            return;
        }

        let command = match Command::decode_checked(envelope.payload) {
            Ok(command) => command,
            Err(e) => {
                self.inner.stats.record_drop(DropReason::Malformed);
                tracing::debug!(remote_addr = %addr, error = %e, "dropping undecodable command");
                return;
            }
        };

        match Name::try_from(command.name) {
            Ok(Name::Write) => {
                let signature = *envelope.signature;
                if let Some(record) = command.msg {
                    self.handle_write(signature, inbound.arrived, record, fanout_tx, cancel)
                        .await;
                }
            }
            Ok(Name::Query) => {
                let Ok(permit) = Arc::clone(&self.inner.inflight).try_acquire_owned() else {
                    self.inner.stats.record_drop(DropReason::QueueFull);
                    tracing::warn!(remote_addr = %addr, "handler budget exhausted, dropping query");
                    return;
                };
                self.inner.stats.record_query();
                let transport = self.clone();
                let params = command.params();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    query::respond(&transport, params, addr, &cancel).await;
                });
            }
            Ok(Name::Tail | Name::Ping) | Err(_) => {
                self.inner.stats.record_drop(DropReason::Malformed);
                tracing::debug!(
                    remote_addr = %addr,
                    name = command.name,
                    "control command on data plane dropped"
                );
            }
        }
    }

    async fn handle_write(
        &self,
        signature: [u8; SIGNATURE_LEN],
        arrived: Instant,
        record: LogRecord,
        fanout_tx: &mpsc::Sender<Vec<u8>>,
        cancel: &CancellationToken,
    ) {
        if self.inner.guard.seen(&signature, arrived) {
            self.inner.stats.record_drop(DropReason::Duplicate);
            tracing::debug!(
                key = %record.key,
                signature = %hex::encode(&signature[..8]),
                "dropping duplicate write"
            );
            return;
        }

        let Some(partition) = partition_key(&record.key) else {
            self.inner.stats.record_drop(DropReason::BadKey);
            tracing::debug!(key = %record.key, "dropping write with short key");
            return;
        };

        let value = pack(&record);
        let store = self.store();
        let stored = value.clone();
        match tokio::task::spawn_blocking(move || store.write(&partition, &stored)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.inner.stats.record_drop(DropReason::StoreFailed);
                tracing::error!(key = %record.key, error = %e, "failed to persist record");
                return;
            }
            Err(e) => {
                self.inner.stats.record_drop(DropReason::StoreFailed);
                tracing::error!(key = %record.key, error = %e, "store task failed");
                return;
            }
        }
        self.inner.stats.record_write();

        if self.inner.registry.is_empty() {
            return;
        }
        tokio::select! {
            () = cancel.cancelled() => {}
            sent = fanout_tx.send(value) => {
                if sent.is_err() {
                    tracing::debug!("fan-out queue closed");
                }
            }
        }
    }

    async fn send_loop(
        self,
        mut fanout_rx: mpsc::Receiver<Vec<u8>>,
        fanout_tx: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
    ) {
        loop {
            let packet = tokio::select! {
                () = cancel.cancelled() => break,
                next = fanout_rx.recv() => match next {
                    Some(packet) => packet,
                    None => break,
                },
            };

            let targets = self.inner.registry.snapshot();
            let results = join_all(targets.iter().map(|addr| self.send_to(&packet, *addr))).await;

            for (addr, result) in targets.into_iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!(remote_addr = %addr, error = %e, "send to tailer failed");
                    if self.inner.registry.remove(addr) {
                        self.notify_evicted(addr, "send failed", &fanout_tx).await;
                    }
                }
            }
        }
    }

    async fn sweep_loop(self, fanout_tx: mpsc::Sender<Vec<u8>>, cancel: CancellationToken) {
        let threshold = self.inner.settings.eviction_threshold();
        let mut ticker = interval(self.inner.settings.ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for addr in self.inner.registry.evict_expired(Instant::now(), threshold) {
                tracing::info!(remote_addr = %addr, "kicked tailer, ping timed out");
                self.notify_evicted(addr, "ping timed out", &fanout_tx).await;
            }
        }
    }

    /// Tells an evicted address it was dropped, then tells everyone else.
    async fn notify_evicted(&self, addr: SocketAddr, reason: &str, fanout_tx: &mpsc::Sender<Vec<u8>>) {
        let packet = pack(&LogRecord::kicked(reason));
        if let Err(e) = self.send_to(&packet, addr).await {
            tracing::debug!(remote_addr = %addr, error = %e, "failed to deliver kick notice");
        }

        let broadcast = pack(&LogRecord::notice(format!("tailer {addr} kicked")));
        if fanout_tx.try_send(broadcast).is_err() {
            tracing::debug!(remote_addr = %addr, "fan-out queue busy, eviction notice skipped");
        }
    }
}
