//! Literal-byte scenarios for the AM status PDU codec (scenarios 1-3).

use rlc_am::pdu::status::{AmStatusPdu, StatusNack};
use rlc_am::SnSize;

#[test]
fn no_nack_12bit_packs_to_three_bytes() {
    let mut status = AmStatusPdu::new(SnSize::Size12);
    status.ack_sn = 2065;

    assert_eq!(status.packed_size(), 3);
    let mut buf = [0u8; 3];
    let n = status.pack(&mut buf);
    assert_eq!(n, 3);
    assert_eq!(buf, [0x08, 0x11, 0x00]);

    let parsed = AmStatusPdu::unpack(SnSize::Size12, &buf).unwrap();
    assert_eq!(parsed.ack_sn, 2065);
    assert!(parsed.nacks().is_empty());
}

#[test]
fn one_nack_12bit_matches_literal_bytes() {
    let mut status = AmStatusPdu::new(SnSize::Size12);
    status.ack_sn = 2065;
    status.push_nack(StatusNack::whole_sdu(273));

    assert_eq!(status.packed_size(), 5);
    let mut buf = [0u8; 5];
    let n = status.pack(&mut buf);
    assert_eq!(n, 5);
    assert_eq!(buf, [0x08, 0x11, 0x80, 0x11, 0x10]);

    let parsed = AmStatusPdu::unpack(SnSize::Size12, &buf).unwrap();
    assert_eq!(parsed.ack_sn, 2065);
    assert_eq!(parsed.nacks().len(), 1);
    assert_eq!(parsed.nacks()[0].nack_sn, 273);
}

#[test]
fn so_ranges_and_nack_ranges_18bit_roundtrip() {
    let mut status = AmStatusPdu::new(SnSize::Size18);
    status.ack_sn = 200_977 % (1 << 18);
    status.push_nack(StatusNack {
        nack_sn: 69905,
        has_nack_range: true,
        nack_range: 3,
        ..StatusNack::whole_sdu(69905)
    });
    status.push_nack(StatusNack {
        nack_sn: 69913,
        has_so: true,
        so_start: 2,
        so_end: 5,
        has_nack_range: true,
        nack_range: 4,
    });

    let mut buf = vec![0u8; status.packed_size() as usize];
    let n = status.pack(&mut buf);
    assert_eq!(n, 15);

    let parsed = AmStatusPdu::unpack(SnSize::Size18, &buf).unwrap();
    assert_eq!(parsed.ack_sn, status.ack_sn);
    assert_eq!(parsed.nacks().len(), 2);
    assert_eq!(parsed.nacks()[0].nack_sn, 69905);
    assert_eq!(parsed.nacks()[1].nack_sn, 69913);
    assert_eq!(parsed.nacks()[1].so_start, 2);
    assert_eq!(parsed.nacks()[1].so_end, 5);
}

#[test]
fn trim_to_header_only_leaves_ack_only_pdu() {
    let mut status = AmStatusPdu::new(SnSize::Size12);
    status.ack_sn = 10;
    status.push_nack(StatusNack::whole_sdu(5));
    assert!(status.trim(3));
    assert_eq!(status.packed_size(), 3);
    assert!(status.nacks().is_empty());
}

#[test]
fn nack_range_caps_at_255_without_merging_further() {
    let mut status = AmStatusPdu::new(SnSize::Size18);
    status.ack_sn = 1000;
    status.push_nack(StatusNack {
        nack_sn: 0,
        has_nack_range: true,
        nack_range: 255,
        ..StatusNack::whole_sdu(0)
    });
    // One more contiguous NACK must NOT merge into the existing range (already at 255).
    status.push_nack(StatusNack::whole_sdu(255));
    assert_eq!(status.nacks().len(), 2);
    assert_eq!(status.nacks()[0].nack_range, 255);
}
