//! Per-entity counters, updated inline at the same call sites the original source's
//! `metrics.metrics_add_*` calls sit. No aggregation/export pipeline is implemented (out of
//! scope); `snapshot()` hands the caller a plain `Copy` struct to do with as it pleases.

#[derive(Debug, Default, Clone, Copy)]
pub struct TxMetrics {
    pub sdus_submitted: u64,
    pub sdus_delivered: u64,
    pub pdus_sent: u64,
    pub bytes_sent: u64,
    pub retransmissions: u64,
    pub max_retx_events: u64,
    pub discard_failures: u64,
    pub sdu_queue_drops: u64,
    pub retx_queue_drops: u64,
    pub protocol_failures: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RxMetrics {
    pub sdus_delivered: u64,
    pub bytes_delivered: u64,
    pub pdus_malformed: u64,
    pub pdus_window_violation: u64,
    pub pdus_duplicate: u64,
    pub status_reports_generated: u64,
}

impl TxMetrics {
    pub fn snapshot(&self) -> TxMetrics {
        *self
    }
}

impl RxMetrics {
    pub fn snapshot(&self) -> RxMetrics {
        *self
    }
}
