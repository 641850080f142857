//! RX-AM entity behaviour driven only through `handle_pdu`/`status_pdu`, the surface a
//! collaborating TX entity or test harness actually uses.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rlc_am::pdu::header;
use rlc_am::{
    AmHeader, RxAmEntity, RxAmStatusProvider, RxConfig, SameThreadExecutor, SegmentInfo, SnSize,
    UpperLayerDataSink,
};

struct CollectingSink(Arc<Mutex<Vec<Bytes>>>);
impl UpperLayerDataSink for CollectingSink {
    fn on_new_sdu(&mut self, sdu: Bytes) {
        self.0.lock().unwrap().push(sdu);
    }
}

fn make_entity(t_reassembly_ms: u64) -> (RxAmEntity, Arc<Mutex<Vec<Bytes>>>) {
    let sdus = Arc::new(Mutex::new(Vec::new()));
    let entity = RxAmEntity::new(
        RxConfig {
            sn_size_bits: 12,
            t_reassembly_ms,
            t_status_prohibit_ms: 0,
            max_window: 2048,
        },
        Arc::new(SameThreadExecutor),
        Box::new(CollectingSink(sdus.clone())),
    )
    .unwrap();
    (entity, sdus)
}

fn frame(si: SegmentInfo, sn: u32, so: Option<u16>, payload: &[u8]) -> Bytes {
    let hdr = AmHeader {
        dc: true,
        poll: false,
        si,
        sn_size: SnSize::Size12,
        sn,
        so,
    };
    let mut buf = vec![0u8; hdr.packed_size() + payload.len()];
    let n = header::write(&mut buf, &hdr);
    buf[n..].copy_from_slice(payload);
    Bytes::from(buf)
}

/// Scenario 6: overlapping segments reassemble into one SDU, keeping the already-stored byte
/// on overlap, and RX_NEXT advances with no status report pending.
#[test]
fn reassembly_resolves_overlap_and_leaves_no_status_pending() {
    let (entity, sdus) = make_entity(0);

    entity.handle_pdu(frame(SegmentInfo::First, 0, None, &[0xb0, 0xb1]));
    entity.handle_pdu(frame(SegmentInfo::Middle, 0, Some(1), &[0xaa, 0xb2]));
    entity.handle_pdu(frame(SegmentInfo::Last, 0, Some(3), &[0xb3]));

    let got = sdus.lock().unwrap();
    assert_eq!(got.as_slice(), &[Bytes::from_static(&[0xb0, 0xb1, 0xb2, 0xb3])]);
    assert_eq!(entity.state().rx_next, 1);
    assert!(!entity.status_report_required());
}

#[test]
fn poll_bit_forces_status_report_even_without_a_gap() {
    let (entity, _sdus) = make_entity(0);
    let hdr = AmHeader {
        dc: true,
        poll: true,
        si: SegmentInfo::Full,
        sn_size: SnSize::Size12,
        sn: 0,
        so: None,
    };
    let mut buf = vec![0u8; hdr.packed_size() + 1];
    let n = header::write(&mut buf, &hdr);
    buf[n..].copy_from_slice(&[0xAA]);
    entity.handle_pdu(Bytes::from(buf));

    assert!(entity.status_report_required());
    let status = entity.status_pdu();
    assert_eq!(status.ack_sn, 1);
    assert!(status.nacks().is_empty());
    assert!(!entity.status_report_required());
}

#[test]
fn pdu_outside_rx_window_is_dropped_without_advancing_state() {
    let (entity, sdus) = make_entity(0);
    let far_sn = (1 << 12) / 2 + 5;
    entity.handle_pdu(frame(SegmentInfo::Full, far_sn, None, b"x"));
    assert!(sdus.lock().unwrap().is_empty());
    assert_eq!(entity.state().rx_next, 0);
}
