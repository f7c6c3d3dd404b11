mod codec;
mod config;
mod session;
mod state;
mod voice;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use config::Config;
use relay_metrics::{MetricsConfig, MetricsServer};
use session::SessionConfig;
use state::GatewayState;

const METRICS_NAMESPACE: &str = "relay";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    let ms = MetricsServer::install(MetricsConfig {
        listen: cfg.metrics_listen.clone(),
        namespace: METRICS_NAMESPACE,
    })?;
    tokio::spawn(async move {
        let _ = ms.serve().await;
    });

    let state = Arc::new(GatewayState::new(&cfg.default_room, METRICS_NAMESPACE));
    let session_cfg = Arc::new(SessionConfig {
        login_timeout: Duration::from_secs(cfg.login_timeout_secs),
        max_line_bytes: cfg.max_line_bytes,
    });

    let udp_socket = UdpSocket::bind(&cfg.udp_listen).await?;
    info!(addr = %udp_socket.local_addr()?, "voice relay listening");
    tokio::spawn(voice::run(state.clone(), udp_socket));

    let listener = TcpListener::bind(&cfg.tcp_listen).await?;
    info!(addr = %listener.local_addr()?, "control relay listening");

    tokio::select! {
        r = accept_loop(listener, state, session_cfg) => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<GatewayState>,
    session_cfg: Arc<SessionConfig>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        let session_cfg = session_cfg.clone();
        tokio::spawn(async move {
            session::handle_connection(state, session_cfg, stream, peer).await;
        });
    }
}
