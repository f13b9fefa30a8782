//! Test doubles shared by the audit tests

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::gelf::{GelfHost, Transport};

/// Transport that hands every payload to a channel
pub(crate) struct RecordingTransport {
    host: ArcSwap<GelfHost>,
    sent: mpsc::UnboundedSender<Vec<u8>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            host: ArcSwap::from_pointee(GelfHost::default()),
            sent,
        });
        (transport, rx)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        let _ = self.sent.send(payload.to_vec());
        Ok(())
    }

    fn set_host(&self, host: GelfHost) {
        self.host.store(Arc::new(host));
    }

    fn host(&self) -> Arc<GelfHost> {
        self.host.load_full()
    }
}

/// Wait for the next payload and decode it
pub(crate) async fn next_gelf(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Value {
    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("record delivered in time")
        .expect("transport still open");
    serde_json::from_slice(&payload).unwrap()
}
