//! Bit-exact codec for the AM data PDU header (TS 38.322 §6.2.2.4), 2/3/5 bytes depending on
//! `sn_size` and whether a segment offset is carried. No dynamic allocation: `read`/`write`
//! operate on a caller-supplied byte slice.

use crate::sn::SnSize;

/// Segmentation info, `SI` in the wire format: `00=full_sdu`, `01=first_segment`,
/// `10=last_segment`, `11=middle_segment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentInfo {
    Full,
    First,
    Last,
    Middle,
}

impl SegmentInfo {
    fn from_bits(b: u8) -> Self {
        match b & 0x03 {
            0b00 => SegmentInfo::Full,
            0b01 => SegmentInfo::First,
            0b10 => SegmentInfo::Last,
            0b11 => SegmentInfo::Middle,
            _ => unreachable!("masked to 2 bits"),
        }
    }

    fn bits(self) -> u8 {
        match self {
            SegmentInfo::Full => 0b00,
            SegmentInfo::First => 0b01,
            SegmentInfo::Last => 0b10,
            SegmentInfo::Middle => 0b11,
        }
    }

    /// SO is only carried for segments that are not the first one.
    pub fn carries_so(self) -> bool {
        matches!(self, SegmentInfo::Middle | SegmentInfo::Last)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmHeader {
    pub dc: bool,
    pub poll: bool,
    pub si: SegmentInfo,
    pub sn_size: SnSize,
    pub sn: u32,
    /// Present iff `si.carries_so()`.
    pub so: Option<u16>,
}

/// Minimum AM data PDU header size for `sn_size` (no SO field): 2 bytes for a 12-bit SN, 3
/// bytes for an 18-bit SN. Callers building a PDU from scratch (the TX entity) need this
/// before they have a complete `AmHeader` to ask `packed_size()` of.
pub fn min_header_size(sn_size: SnSize) -> usize {
    AmHeader::min_size(sn_size)
}

impl AmHeader {
    fn min_size(sn_size: SnSize) -> usize {
        match sn_size {
            SnSize::Size12 => 2,
            SnSize::Size18 => 3,
        }
    }

    /// Number of bytes `write` will emit for this header.
    pub fn packed_size(&self) -> usize {
        let min = Self::min_size(self.sn_size);
        if self.si.carries_so() {
            min + 2
        } else {
            min
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("AM PDU too short for header: need at least {needed} bytes (incl. 1 payload byte), got {got}")]
    TooShort { needed: usize, got: usize },
    #[error("malformed AM PDU header: reserved bits set")]
    ReservedBitsSet,
    #[error("malformed AM PDU header: segment offset truncated")]
    MissingSegmentOffset,
}

/// Parses the AM data PDU header from `bytes`. Returns the header and the number of bytes
/// consumed (so the caller can slice the remaining payload).
///
/// Mirrors `rlc_am_read_data_pdu_header`: the buffer must be strictly longer than the header's
/// minimum size, since a header with zero payload bytes is meaningless.
pub fn read(bytes: &[u8], sn_size: SnSize) -> Result<(AmHeader, usize), HeaderError> {
    let min_size = AmHeader::min_size(sn_size);
    if bytes.len() <= min_size {
        return Err(HeaderError::TooShort {
            needed: min_size + 1,
            got: bytes.len(),
        });
    }

    let dc = (bytes[0] >> 7) & 0x01 != 0;
    let poll = (bytes[0] >> 6) & 0x01 != 0;
    let si = SegmentInfo::from_bits(bytes[0] >> 4);

    let (sn, mut consumed) = match sn_size {
        SnSize::Size12 => {
            let sn = ((bytes[0] & 0x0f) as u32) << 8 | bytes[1] as u32;
            (sn, 2usize)
        }
        SnSize::Size18 => {
            if bytes[0] & 0x0c != 0 {
                return Err(HeaderError::ReservedBitsSet);
            }
            let sn = ((bytes[0] & 0x03) as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32;
            (sn, 3usize)
        }
    };

    let so = if si.carries_so() {
        if bytes.len() < consumed + 2 {
            return Err(HeaderError::MissingSegmentOffset);
        }
        let so = ((bytes[consumed] as u16) << 8) | bytes[consumed + 1] as u16;
        consumed += 2;
        Some(so)
    } else {
        None
    };

    Ok((
        AmHeader {
            dc,
            poll,
            si,
            sn_size,
            sn,
            so,
        },
        consumed,
    ))
}

/// Serialises `hdr` into `buf`, returning the number of bytes written (2, 3, 4 or 5).
///
/// It is a programming error to call this with a buffer shorter than `hdr.packed_size()`.
pub fn write(buf: &mut [u8], hdr: &AmHeader) -> usize {
    let needed = hdr.packed_size();
    assert!(
        buf.len() >= needed,
        "write: buffer of {} bytes too small for header needing {needed} (programming error)",
        buf.len()
    );

    buf[0] = ((hdr.dc as u8) << 7) | ((hdr.poll as u8) << 6) | (hdr.si.bits() << 4);
    let mut idx = 1;
    match hdr.sn_size {
        SnSize::Size12 => {
            buf[0] |= ((hdr.sn >> 8) & 0x0f) as u8;
            buf[idx] = (hdr.sn & 0xff) as u8;
            idx += 1;
        }
        SnSize::Size18 => {
            buf[0] |= ((hdr.sn >> 16) & 0x03) as u8;
            buf[idx] = ((hdr.sn >> 8) & 0xff) as u8;
            idx += 1;
            buf[idx] = (hdr.sn & 0xff) as u8;
            idx += 1;
        }
    }
    if let Some(so) = hdr.so {
        buf[idx] = (so >> 8) as u8;
        idx += 1;
        buf[idx] = (so & 0xff) as u8;
        idx += 1;
    }
    idx
}
