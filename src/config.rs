//! Bearer configuration for the TX and RX AM entities (spec §6.6).
//!
//! Loading these from YAML/CLI is out of scope; validating them before an entity is
//! constructed is not — a malformed config is rejected up front rather than trusted, the same
//! defensive posture the teacher's `TCB::listen`/`syn_sent` constructors take with their
//! initial sequence numbers and window sizes.

use crate::error::ConfigError;
use crate::sn::SnSize;

fn sn_size_from_bits(bits: u8) -> Result<SnSize, ConfigError> {
    match bits {
        12 => Ok(SnSize::Size12),
        18 => Ok(SnSize::Size18),
        other => Err(ConfigError::InvalidSnSize(other)),
    }
}

/// TX-side configuration: `{sn_size, t_poll_retx_ms, max_retx_thresh, poll_pdu, poll_byte,
/// queue_sdu_count, queue_bytes, max_window}`.
#[derive(Debug, Clone, Copy)]
pub struct TxConfig {
    pub sn_size_bits: u8,
    pub t_poll_retx_ms: u64,
    pub max_retx_thresh: u32,
    pub poll_pdu: u32,
    pub poll_byte: u64,
    pub queue_sdu_count: usize,
    pub queue_bytes: usize,
    pub max_window: usize,
}

impl TxConfig {
    pub fn sn_size(&self) -> Result<SnSize, ConfigError> {
        sn_size_from_bits(self.sn_size_bits)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sn_size()?;
        if self.queue_sdu_count == 0 {
            return Err(ConfigError::ZeroQueueSduCount);
        }
        if self.queue_bytes == 0 {
            return Err(ConfigError::ZeroQueueBytes);
        }
        if self.max_window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }
}

/// RX-side configuration: `{sn_size, t_reassembly_ms, t_status_prohibit_ms}`.
#[derive(Debug, Clone, Copy)]
pub struct RxConfig {
    pub sn_size_bits: u8,
    pub t_reassembly_ms: u64,
    pub t_status_prohibit_ms: u64,
    pub max_window: usize,
}

impl RxConfig {
    pub fn sn_size(&self) -> Result<SnSize, ConfigError> {
        sn_size_from_bits(self.sn_size_bits)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sn_size()?;
        if self.max_window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_tx() -> TxConfig {
        TxConfig {
            sn_size_bits: 12,
            t_poll_retx_ms: 45,
            max_retx_thresh: 4,
            poll_pdu: 4,
            poll_byte: 25,
            queue_sdu_count: 256,
            queue_bytes: 1 << 20,
            max_window: 2048,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_tx().validate().is_ok());
    }

    #[test]
    fn bad_sn_size_rejected() {
        let mut cfg = valid_tx();
        cfg.sn_size_bits = 16;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSnSize(16)));
    }

    #[test]
    fn zero_window_rejected() {
        let mut cfg = valid_tx();
        cfg.max_window = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroWindow));
    }
}
