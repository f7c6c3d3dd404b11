//! Process-wide state shared across every connection: the client directory,
//! the active-call map, and the voice relay, wired together behind the
//! channel-handle type this binary actually uses.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use relay_control::{CallController, ClientName, Registry};
use relay_media::{VoiceDirectory, VoiceRelay, VoiceRelayConfig};
use relay_metrics::{GatewayMetrics, VoiceMetricsImpl};

use crate::codec::ServerFrame;

/// One unit of work for a connection's dedicated writer task. A file
/// transfer's header, length prefix, and payload bytes ride together so a
/// slow or ill-timed interleaving can never split them across two queued
/// messages (I6).
#[derive(Debug, Clone)]
pub enum Outbound {
    Control(ServerFrame),
    File { header: ServerFrame, payload: Bytes },
}

pub type OutboundHandle = mpsc::Sender<Outbound>;

/// Depth of each connection's outbound mailbox. A client that cannot keep up
/// starts losing queued messages rather than stalling whoever is sending to it.
pub const OUTBOUND_MAILBOX_DEPTH: usize = 256;

/// Enqueues `msg` for delivery without blocking the caller. A full or closed
/// mailbox means the recipient is gone or too slow; the message is dropped
/// rather than backing up the sender.
pub fn post(handle: &OutboundHandle, msg: Outbound) {
    if handle.try_send(msg).is_err() {
        tracing::debug!("dropping outbound message: mailbox full or closed");
    }
}

pub struct GatewayState {
    pub registry: Arc<Registry<OutboundHandle>>,
    pub calls: Arc<CallController>,
    pub voice: Arc<VoiceRelay>,
    pub metrics: Arc<GatewayMetrics>,
}

impl GatewayState {
    pub fn new(default_room: &str, metrics_namespace: &'static str) -> Self {
        let registry = Arc::new(Registry::new(default_room));
        let calls = Arc::new(CallController::new());
        let metrics = Arc::new(GatewayMetrics::new(metrics_namespace));

        let directory: Arc<dyn VoiceDirectory> = Arc::new(VoiceDirectoryAdapter {
            registry: registry.clone(),
            calls: calls.clone(),
        });
        let voice_metrics = Arc::new(VoiceMetricsImpl::new(metrics_namespace));
        let voice = Arc::new(VoiceRelay::new(
            VoiceRelayConfig::default(),
            directory,
            voice_metrics,
        ));

        Self {
            registry,
            calls,
            voice,
            metrics,
        }
    }
}

/// Bridges `relay-media`'s socket-free [`VoiceDirectory`] seam onto the
/// Registry and CallController this binary already maintains, so the voice
/// relay never needs its own copy of either.
struct VoiceDirectoryAdapter {
    registry: Arc<Registry<OutboundHandle>>,
    calls: Arc<CallController>,
}

impl VoiceDirectory for VoiceDirectoryAdapter {
    fn learn_endpoint(&self, name: &str, addr: SocketAddr) {
        if let Some(client) = ClientName::parse(name) {
            self.registry.set_voice_endpoint(&client, addr);
        }
    }

    fn call_partner(&self, name: &str) -> Option<String> {
        let client = ClientName::parse(name)?;
        self.calls.partner_of(&client).map(String::from)
    }

    fn endpoint_of(&self, name: &str) -> Option<SocketAddr> {
        let client = ClientName::parse(name)?;
        self.registry.voice_endpoint(&client)
    }
}
