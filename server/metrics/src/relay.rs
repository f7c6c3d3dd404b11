use metrics::{counter, histogram};

/// Connection and session lifecycle counters, under `{ns}_gateway_*`.
pub struct GatewayMetrics {
    ns: &'static str,
}

impl GatewayMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn conn_accepted(&self) {
        counter!(format!("{}_gateway_connections_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn conn_closed(&self) {
        counter!(format!("{}_gateway_connections_closed_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn login_succeeded(&self) {
        counter!(format!("{}_gateway_login_success_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn login_rejected(&self, reason: &'static str) {
        counter!(format!("{}_gateway_login_rejected_total", self.ns), "reason" => reason).increment(1);
    }

    #[inline]
    pub fn control_msg_rx(&self, kind: &'static str) {
        counter!(format!("{}_gateway_control_rx_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn control_msg_tx(&self, kind: &'static str) {
        counter!(format!("{}_gateway_control_tx_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn file_transfer_started(&self) {
        counter!(format!("{}_gateway_file_transfers_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn file_transfer_completed(&self, bytes: u64) {
        counter!(format!("{}_gateway_file_transfers_completed_total", self.ns)).increment(1);
        histogram!(format!("{}_gateway_file_transfer_bytes", self.ns)).record(bytes as f64);
    }

    #[inline]
    pub fn file_transfer_aborted(&self, reason: &'static str) {
        counter!(format!("{}_gateway_file_transfers_aborted_total", self.ns), "reason" => reason).increment(1);
    }

    #[inline]
    pub fn call_transition(&self, transition: &'static str) {
        counter!(format!("{}_gateway_call_transitions_total", self.ns), "transition" => transition).increment(1);
    }
}

/// Voice datagram counters, under `{ns}_voice_*`.
pub struct VoiceMetricsImpl {
    ns: &'static str,
}

impl VoiceMetricsImpl {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    fn drop_reason(&self, reason: &'static str) {
        counter!(format!("{}_voice_drops_total", self.ns), "reason" => reason).increment(1);
    }
}

impl relay_media::VoiceMetrics for VoiceMetricsImpl {
    fn inc_rx_packets(&self) {
        counter!(format!("{}_voice_rx_packets_total", self.ns)).increment(1);
    }
    fn inc_rx_bytes(&self, n: usize) {
        counter!(format!("{}_voice_rx_bytes_total", self.ns)).increment(n as u64);
    }
    fn inc_drop_invalid(&self) {
        self.drop_reason("invalid");
    }
    fn inc_drop_no_partner(&self) {
        self.drop_reason("no_partner");
    }
    fn inc_drop_endpoint_unknown(&self) {
        self.drop_reason("endpoint_unknown");
    }
    fn inc_forwarded(&self) {
        counter!(format!("{}_voice_forwarded_total", self.ns)).increment(1);
    }
}
