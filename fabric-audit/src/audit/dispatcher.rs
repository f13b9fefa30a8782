//! Audit record assembly and fire-and-forget dispatch
//!
//! [`AuditDispatcher`] builds a record from the request, the caller's data
//! and resolved topology identity, encodes it as GELF and queues it for a
//! background sender. The recording operations never fail and never block
//! on the collector: every error, and any panic, is absorbed at the top of
//! the call and only shows up in [`AuditDispatcher::stats`].
//!
//! # Architecture
//!
//! Encoded payloads go into a bounded queue. A single dispatch task drains
//! it and runs up to `workers` sends at once, each bounded by the send
//! timeout. Sends run on their own tasks, so a cancelled request never
//! cancels a send it already queued.
//!
//! # Panics
//!
//! A panic in record assembly or in a transport send is caught and counted
//! as `failed`. The process panic hook still runs first, and the default
//! hook prints the panic to stderr. Hosts that want absorbed panics to stay
//! silent install their own hook with `std::panic::set_hook`.

use arc_swap::ArcSwapOption;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::extract::extract;
use super::level::AuditLevel;
use super::metadata::{self, InstanceMetadata};
use super::request::AuditRequest;
use crate::config::AuditConfig;
use crate::error::{Error, Result};
use crate::gelf::{GelfHost, GelfMessage, Transport, UdpTransport, DEFAULT_HOST};

/// Session data key holding per-call metadata
pub const METADATA_KEY: &str = "metadata";

const FULL_MESSAGE_PREFIX: &str = "Audit";

/// Upper bound on concurrent sends
pub const MAX_WORKERS: usize = 1024;

#[derive(Debug, Default)]
struct DispatchStats {
    queued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    /// Records accepted into the send queue
    pub queued: u64,
    /// Records the transport accepted
    pub sent: u64,
    /// Records discarded because the queue was full or closed
    pub dropped: u64,
    /// Records lost to build, encode or transport failures
    pub failed: u64,
}

/// Builds audit records and ships them to the collector
///
/// Construct one per service instance in the composition root and share it
/// behind an `Arc`. Must be built inside a tokio runtime.
pub struct AuditDispatcher {
    enabled: bool,
    facility: String,
    source_host: Option<String>,
    instance_metadata: ArcSwapOption<InstanceMetadata>,
    transport: Arc<dyn Transport>,
    queue: mpsc::Sender<Vec<u8>>,
    stats: Arc<DispatchStats>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditDispatcher {
    /// Build a dispatcher sending over UDP to `config.host`
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let host = GelfHost::parse(&config.host)?;
        let transport = Arc::new(UdpTransport::new(host, config.chunk_size));
        Self::new(config, transport)
    }

    /// Build a dispatcher around any transport
    ///
    /// Fails with [`Error::Runtime`] outside a tokio runtime.
    pub fn new(config: &AuditConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

        let workers = config.workers.clamp(1, MAX_WORKERS);
        let queue_capacity = config.queue_capacity.max(1);
        let (queue, rx) = mpsc::channel(queue_capacity);
        let stats = Arc::new(DispatchStats::default());
        let shutdown = CancellationToken::new();

        let worker = runtime.spawn(run_sender(
            rx,
            Arc::clone(&transport),
            workers,
            config.send_timeout(),
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        tracing::info!(
            host = %transport.host(),
            workers,
            queue_capacity,
            enabled = config.enabled,
            "Audit dispatcher started"
        );

        let dispatcher = Self {
            enabled: config.enabled,
            facility: config.facility.clone(),
            source_host: config.source_host.clone(),
            instance_metadata: ArcSwapOption::empty(),
            transport,
            queue,
            stats,
            shutdown,
            worker: Mutex::new(Some(worker)),
        };

        if !config.metadata.is_empty() {
            dispatcher.set_metadata(&config.metadata);
        }

        Ok(dispatcher)
    }

    /// Configure instance metadata
    ///
    /// Keys are normalized (`-` becomes `_`). Calling again replaces the
    /// previous metadata wholesale.
    pub fn set_metadata<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.instance_metadata
            .store(Some(Arc::new(InstanceMetadata::new(entries))));
    }

    /// Instance metadata, if configured
    pub fn instance_metadata(&self) -> Option<Arc<InstanceMetadata>> {
        self.instance_metadata.load_full()
    }

    /// Point the transport at another collector; `None` means [`DEFAULT_HOST`]
    pub fn set_host(&self, host: Option<&str>) -> Result<()> {
        let host = GelfHost::parse(host.unwrap_or(DEFAULT_HOST))?;
        self.transport.set_host(host);
        Ok(())
    }

    /// Current collector
    pub fn host(&self) -> Arc<GelfHost> {
        self.transport.host()
    }

    /// Record an arbitrary entry for `request`
    ///
    /// `data` is laid over the fields extracted from the request; its keys
    /// win on collision. Never fails and never blocks on the collector.
    pub fn record(&self, data: Map<String, Value>, level: AuditLevel, request: &AuditRequest) {
        self.guarded(|| self.enqueue(data, level, request));
    }

    /// Record an API request at [`AuditLevel::Info`] with the configured facility
    pub fn record_request(
        &self,
        instance_id: &str,
        request: &AuditRequest,
        session_data: Map<String, Value>,
    ) {
        self.record_request_with(instance_id, request, session_data, AuditLevel::default(), None);
    }

    /// Record an API request
    ///
    /// The `metadata` entry of `session_data` is consumed for topology
    /// resolution; the rest is recorded under `user`. Never fails and never
    /// blocks on the collector.
    pub fn record_request_with(
        &self,
        instance_id: &str,
        request: &AuditRequest,
        session_data: Map<String, Value>,
        level: AuditLevel,
        facility: Option<&str>,
    ) {
        self.guarded(|| {
            let overlay = self.request_overlay(instance_id, request, session_data, facility)?;
            self.enqueue(overlay, level, request)
        });
    }

    /// Current dispatch counters
    pub fn stats(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            queued: self.stats.queued.load(Ordering::Relaxed),
            sent: self.stats.sent.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting records, flush the queue and wait for in-flight sends
    ///
    /// Records submitted afterwards are dropped.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            let _ = worker.await;
            tracing::info!(stats = ?self.stats(), "Audit dispatcher stopped");
        }
    }

    /// Run one recording operation, absorbing every failure
    fn guarded<F>(&self, operation: F)
    where
        F: FnOnce() -> Result<()>,
    {
        if !self.enabled {
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(operation)) {
            Ok(Ok(())) => {}
            Ok(Err(Error::QueueFull | Error::QueueClosed)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(_)) | Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn enqueue(
        &self,
        data: Map<String, Value>,
        level: AuditLevel,
        request: &AuditRequest,
    ) -> Result<()> {
        let payload = self.build_message(data, level, request)?.encode()?;
        self.queue.try_send(payload)?;
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// `{facility, dfe, user}` overlay for a request record
    fn request_overlay(
        &self,
        instance_id: &str,
        request: &AuditRequest,
        mut session_data: Map<String, Value>,
        facility: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let per_call = session_data
            .remove(METADATA_KEY)
            .map(|value| InstanceMetadata::from_json(&value));
        let instance = self.instance_metadata.load_full();

        let dfe = metadata::resolve(
            instance_id,
            per_call.as_ref(),
            instance.as_deref(),
            request.server(),
        );

        let mut overlay = Map::new();
        overlay.insert(
            "facility".to_string(),
            Value::String(facility.unwrap_or(&self.facility).to_string()),
        );
        overlay.insert("dfe".to_string(), serde_json::to_value(dfe)?);
        overlay.insert("user".to_string(), Value::Object(session_data));
        Ok(overlay)
    }

    fn build_message(
        &self,
        data: Map<String, Value>,
        level: AuditLevel,
        request: &AuditRequest,
    ) -> Result<GelfMessage> {
        let Value::Object(mut record) = serde_json::to_value(extract(request))? else {
            return Err(Error::Encode("request fields are not an object".to_string()));
        };
        record.extend(data);

        let short_message = format!("{} {}", request.method(), request.request_uri());
        let full_message = format!(
            "{} | {} | {}",
            FULL_MESSAGE_PREFIX,
            source_ips(&record)?,
            timestamp_text(&record)
        );

        let mut message = GelfMessage::from_record(record);
        if let Some(ref host) = self.source_host {
            message = message.with_source_host(host.clone());
        }
        message
            .set_level(level)
            .set_short_message(short_message)
            .set_full_message(full_message);
        Ok(message)
    }
}

impl fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("enabled", &self.enabled)
            .field("facility", &self.facility)
            .field("host", &self.transport.host().to_string())
            .field("instance_metadata", &self.instance_metadata.load().is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Comma-joined `source_ip` list of the merged record
fn source_ips(record: &Map<String, Value>) -> Result<String> {
    let Some(Value::Array(ips)) = record.get("source_ip") else {
        return Err(Error::Encode("source_ip is not a list".to_string()));
    };

    Ok(ips
        .iter()
        .map(|ip| match ip {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", "))
}

fn timestamp_text(record: &Map<String, Value>) -> String {
    match record.get("request_timestamp") {
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| n.to_string()),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

async fn run_sender(
    mut rx: mpsc::Receiver<Vec<u8>>,
    transport: Arc<dyn Transport>,
    workers: usize,
    send_timeout: Duration,
    stats: Arc<DispatchStats>,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(workers));

    loop {
        let payload = tokio::select! {
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        spawn_send(payload, &permits, &transport, send_timeout, &stats).await;
    }

    // Flush whatever was accepted before intake stopped
    rx.close();
    while let Some(payload) = rx.recv().await {
        spawn_send(payload, &permits, &transport, send_timeout, &stats).await;
    }

    let _ = permits.acquire_many(workers as u32).await;
}

async fn spawn_send(
    payload: Vec<u8>,
    permits: &Arc<Semaphore>,
    transport: &Arc<dyn Transport>,
    send_timeout: Duration,
    stats: &Arc<DispatchStats>,
) {
    let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
        return;
    };
    let transport = Arc::clone(transport);
    let stats = Arc::clone(stats);

    tokio::spawn(async move {
        let _permit = permit;
        let send = AssertUnwindSafe(transport.send(&payload)).catch_unwind();
        match tokio::time::timeout(send_timeout, send).await {
            Ok(Ok(Ok(()))) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ok(Err(_))) | Ok(Err(_)) | Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}
