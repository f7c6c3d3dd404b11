//! Voice datagram forwarding.
//!
//! Responsibilities:
//! - Parse and validate incoming voice datagrams.
//! - Learn the sender's return endpoint from traffic (no declared addresses).
//! - Resolve the call partner and forward the audio payload, stripped of its
//!   name header, to the partner's last-known endpoint.
//!
//! The relay does not own the UDP socket; the gateway binary reads
//! datagrams and calls [`VoiceRelay::handle_datagram`] per packet, sending
//! whatever it returns. This keeps the relay itself socket-free and trivial
//! to unit test.
//!
//! Packet format (fixed header, no framing beyond the length prefix):
//!   0:  u16 name_length  (network order)
//!   2:  ... name bytes   (UTF-8)
//!   ...  audio bytes     (opaque, forwarded verbatim)

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tracing::debug;

/// Read-side of the Registry and Call controller that the voice relay
/// needs. Kept as a trait so this crate has no dependency on the wire
/// protocol or the channel-handle type the gateway uses internally.
pub trait VoiceDirectory: Send + Sync {
    /// Learns/updates `name`'s return address. Idempotent overwrite.
    fn learn_endpoint(&self, name: &str, addr: SocketAddr);

    /// The active-call partner of `name`, if any.
    fn call_partner(&self, name: &str) -> Option<String>;

    /// `name`'s last learned voice endpoint, if it has ever sent a datagram.
    fn endpoint_of(&self, name: &str) -> Option<SocketAddr>;
}

/// Metrics hook. Implement against Prometheus counters in production; tests
/// can use the no-op default.
pub trait VoiceMetrics: Send + Sync {
    fn inc_rx_packets(&self);
    fn inc_rx_bytes(&self, n: usize);
    fn inc_drop_invalid(&self);
    fn inc_drop_no_partner(&self);
    fn inc_drop_endpoint_unknown(&self);
    fn inc_forwarded(&self);
}

pub struct NoopMetrics;

impl VoiceMetrics for NoopMetrics {
    fn inc_rx_packets(&self) {}
    fn inc_rx_bytes(&self, _n: usize) {}
    fn inc_drop_invalid(&self) {}
    fn inc_drop_no_partner(&self) {}
    fn inc_drop_endpoint_unknown(&self) {}
    fn inc_forwarded(&self) {}
}

#[derive(Clone, Debug)]
pub struct VoiceRelayConfig {
    /// Datagrams larger than this are dropped (guards against a hostile or
    /// misconfigured sender flooding oversized packets).
    pub max_datagram_bytes: usize,
    /// Minimum viable packet: 2-byte length prefix plus at least one byte of name.
    pub min_datagram_bytes: usize,
}

impl Default for VoiceRelayConfig {
    fn default() -> Self {
        Self {
            max_datagram_bytes: 1500,
            min_datagram_bytes: 3,
        }
    }
}

pub struct VoiceRelay {
    cfg: VoiceRelayConfig,
    directory: Arc<dyn VoiceDirectory>,
    metrics: Arc<dyn VoiceMetrics>,
}

impl VoiceRelay {
    pub fn new(
        cfg: VoiceRelayConfig,
        directory: Arc<dyn VoiceDirectory>,
        metrics: Arc<dyn VoiceMetrics>,
    ) -> Self {
        Self {
            cfg,
            directory,
            metrics,
        }
    }

    /// Parses, validates, learns the source endpoint, and resolves the
    /// forwarding target for one inbound datagram. Returns `(destination,
    /// stripped audio payload)` to send, or `None` if the datagram was
    /// dropped. Every drop is silent by design; voice is best-effort.
    pub fn handle_datagram(&self, source: SocketAddr, datagram: &[u8]) -> Option<(SocketAddr, Bytes)> {
        self.metrics.inc_rx_packets();
        self.metrics.inc_rx_bytes(datagram.len());

        if datagram.len() < self.cfg.min_datagram_bytes || datagram.len() > self.cfg.max_datagram_bytes {
            self.metrics.inc_drop_invalid();
            return None;
        }

        let name_len = u16::from_be_bytes([datagram[0], datagram[1]]) as usize;
        if 2 + name_len > datagram.len() {
            self.metrics.inc_drop_invalid();
            return None;
        }

        let name = match std::str::from_utf8(&datagram[2..2 + name_len]) {
            Ok(s) => s,
            Err(_) => {
                self.metrics.inc_drop_invalid();
                return None;
            }
        };

        self.directory.learn_endpoint(name, source);

        let partner = match self.directory.call_partner(name) {
            Some(p) => p,
            None => {
                debug!(sender = name, "voice datagram dropped: no active call");
                self.metrics.inc_drop_no_partner();
                return None;
            }
        };

        let dest = match self.directory.endpoint_of(&partner) {
            Some(addr) => addr,
            None => {
                debug!(sender = name, partner = %partner, "voice datagram dropped: partner endpoint unknown");
                self.metrics.inc_drop_endpoint_unknown();
                return None;
            }
        };

        self.metrics.inc_forwarded();
        Some((dest, Bytes::copy_from_slice(&datagram[2 + name_len..])))
    }
}
