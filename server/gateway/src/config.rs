use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-gateway", about = "Chat/file/voice relay server")]
pub struct Config {
    /// TCP listen address for control connections and file bytes.
    #[arg(long, default_value = "0.0.0.0:5555", env = "RELAY_TCP_LISTEN")]
    pub tcp_listen: String,

    /// UDP listen address for voice datagrams.
    #[arg(long, default_value = "0.0.0.0:5556", env = "RELAY_UDP_LISTEN")]
    pub udp_listen: String,

    /// Room new clients start in.
    #[arg(long, default_value = "lobby", env = "RELAY_DEFAULT_ROOM")]
    pub default_room: String,

    /// Seconds a connection has to send `login` before it is dropped.
    #[arg(long, default_value_t = 30, env = "RELAY_LOGIN_TIMEOUT_SECS")]
    pub login_timeout_secs: u64,

    /// Longest control line accepted, in bytes; guards against an unbounded read.
    #[arg(long, default_value_t = 64 * 1024, env = "RELAY_MAX_LINE_BYTES")]
    pub max_line_bytes: usize,

    /// Bind address for the Prometheus scrape endpoint.
    #[arg(long, default_value = "0.0.0.0:9100", env = "RELAY_METRICS_LISTEN")]
    pub metrics_listen: String,
}
