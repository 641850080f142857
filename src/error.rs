/// Validation failures for `TxConfig`/`RxConfig` (see `config.rs`).
///
/// Per-PDU anomalies (malformed PDU, window violation, protocol failure) are *not*
/// represented here — per the error-handling taxonomy they are counted and logged inline,
/// never threaded back through a `Result`, since an RLC entity has no way to "fail" a
/// `handle_pdu`/`pull_pdu` call back to the MAC. A grant too small to carry anything simply
/// yields a zero-length PDU from `pull_pdu`, not an error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported sn_size: {0} (must be 12 or 18)")]
    InvalidSnSize(u8),

    #[error("queue_sdu_count must be non-zero")]
    ZeroQueueSduCount,

    #[error("queue_bytes must be non-zero")]
    ZeroQueueBytes,

    #[error("max_window must be non-zero")]
    ZeroWindow,
}
