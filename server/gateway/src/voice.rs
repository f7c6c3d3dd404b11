//! UDP worker for one-to-one voice: binds the shared datagram socket and
//! feeds every inbound packet through [`relay_media::VoiceRelay`], which
//! does the actual parsing, endpoint learning, and forwarding decision.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::state::GatewayState;

/// Largest datagram this socket will accept into the receive buffer.
/// `VoiceRelay` applies its own (smaller) validity bound on top of this.
const RECV_BUF_SIZE: usize = 2048;

pub async fn run(state: Arc<GatewayState>, socket: UdpSocket) {
    let mut buf = [0u8; RECV_BUF_SIZE];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "voice socket recv failed");
                continue;
            }
        };

        if let Some((dest, payload)) = state.voice.handle_datagram(source, &buf[..len]) {
            if let Err(e) = socket.send_to(&payload, dest).await {
                warn!(%dest, error = %e, "voice forward failed");
            }
        }
    }
}
