//! Collaborator traits wiring the TX and RX entities to each other and to the layers above/below
//! (TS 38.322 §5.3 status reporting loop, §6.5 service primitives).
//!
//! The RX entity needs to hand status PDUs to the TX entity and wake it up when one becomes due;
//! the TX entity needs to hand received status PDUs back to the RX entity's collaborator and to
//! push finished PDUs down to the MAC. These map directly onto `rlc_rx_am_status_provider`,
//! `rlc_tx_am_status_handler` and `rlc_tx_am_status_notifier` from the original interconnect
//! header, generalized from raw pointers to trait objects since nothing here is on a hot enough
//! path to need vtable-free dispatch.

use crate::pdu::AmStatusPdu;
use bytes::Bytes;

/// Exposes the RX entity's latest status report to the collaborating TX entity.
///
/// `Sync` (not just `Send`) because the TX entity keeps a shared `Arc<dyn RxAmStatusProvider>`
/// that it reads from without holding its own lock, so the same provider may be called
/// concurrently with itself from whichever executor the TX side runs on.
pub trait RxAmStatusProvider: Send + Sync {
    fn status_pdu(&self) -> AmStatusPdu;
    fn status_pdu_len(&self) -> u32;
    fn status_report_required(&self) -> bool;
}

/// Entry point on the TX entity for status PDUs received over the air and decoded by the RX
/// entity's `handle_pdu`.
pub trait TxAmStatusHandler: Send {
    fn on_status_pdu(&mut self, status: AmStatusPdu);
}

/// Lets the RX entity tell the TX entity "go re-check my buffer state", without handing over the
/// PDU itself — used both when a status report is newly triggered and when an already-triggered
/// one grows (more NACKs merged in) or shrinks (a gap got filled).
pub trait TxAmStatusNotifier: Send {
    fn on_status_report_changed(&mut self);
}

/// Delivers reassembled SDUs to the layer above the RX entity (PDCP, in a real gNB stack).
pub trait UpperLayerDataSink: Send {
    fn on_new_sdu(&mut self, sdu: Bytes);
}

/// Informs the layer above the TX entity about SDU lifecycle events it can't observe on its own:
/// successful delivery (positively ACK'd), discard failures, exhaustion of the retransmission
/// budget, and malformed status reports (TS 38.322 §5.3 protocol failure, spec §7).
pub trait UpperLayerControl: Send {
    fn on_delivered_sdu(&mut self, pdcp_sn: u32);
    fn on_discard_failure(&mut self, pdcp_sn: u32);
    fn on_max_retx(&mut self, pdcp_sn: Option<u32>);
    fn on_protocol_failure(&mut self);
}

/// Informs the MAC scheduler that the TX entity's buffer occupancy changed, so it can be
/// accounted for in the next scheduling round.
pub trait LowerLayerBufferNotifier: Send {
    fn on_buffer_state_update(&mut self, bytes: u32);
}
