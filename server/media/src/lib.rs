pub mod voice_relay;

pub use voice_relay::{NoopMetrics, VoiceDirectory, VoiceMetrics, VoiceRelay, VoiceRelayConfig};
