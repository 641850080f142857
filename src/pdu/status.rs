//! AM status PDU codec and incremental builder (TS 38.322 §6.2.2.5, §5.3.4).
//!
//! A status PDU carries `ACK_SN` plus an ordered list of NACKs, each optionally carrying a
//! segment-offset range (partial SDU loss) and/or a NACK range (a run of consecutive lost
//! SDUs). `push_nack` merges a newly pushed NACK into the previous one in place whenever they
//! describe a continuous run, keeping `packed_size` in sync without a full re-scan.

use crate::sn::SnSize;

/// Sentinel marking "the missing range extends to the end of the SDU".
pub const SO_END_OF_SDU: u16 = 0xFFFF;

/// Reserved value meaning "no ACK_SN set yet".
pub const INVALID_SN: u32 = u32::MAX;

const HEADER_SIZE: u32 = 3;
const NACK_SN_EXT_12BIT: u32 = 2;
const NACK_SN_EXT_18BIT: u32 = 3;
const NACK_SO_SIZE: u32 = 4;
const NACK_RANGE_SIZE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusNack {
    pub nack_sn: u32,
    pub has_so: bool,
    pub so_start: u16,
    pub so_end: u16,
    pub has_nack_range: bool,
    pub nack_range: u8,
}

impl Default for StatusNack {
    fn default() -> Self {
        Self {
            nack_sn: 0,
            has_so: false,
            so_start: 0,
            so_end: SO_END_OF_SDU,
            has_nack_range: false,
            nack_range: 0,
        }
    }
}

impl StatusNack {
    pub fn whole_sdu(nack_sn: u32) -> Self {
        Self {
            nack_sn,
            ..Default::default()
        }
    }

    pub fn byte_range(nack_sn: u32, so_start: u16, so_end: u16) -> Self {
        Self {
            nack_sn,
            has_so: true,
            so_start,
            so_end,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("buffer too short for status PDU header")]
    TooShort,
    #[error("not a control PDU (D/C bit indicates data)")]
    NotControlPdu,
    #[error("unsupported control PDU type (CPT != 0)")]
    UnsupportedCpt,
    #[error("malformed status PDU: reserved bits set")]
    ReservedBitsSet,
    #[error("truncated NACK entry")]
    TruncatedNack,
}

#[derive(Debug, Clone)]
pub struct AmStatusPdu {
    sn_size: SnSize,
    modulus: u32,
    nacks: Vec<StatusNack>,
    packed_size: u32,
    pub ack_sn: u32,
}

impl AmStatusPdu {
    pub fn new(sn_size: SnSize) -> Self {
        Self {
            sn_size,
            modulus: sn_size.modulus(),
            nacks: Vec::new(),
            packed_size: HEADER_SIZE,
            ack_sn: INVALID_SN,
        }
    }

    pub fn reset(&mut self) {
        self.ack_sn = INVALID_SN;
        self.nacks.clear();
        self.packed_size = HEADER_SIZE;
    }

    pub fn nacks(&self) -> &[StatusNack] {
        &self.nacks
    }

    pub fn packed_size(&self) -> u32 {
        self.packed_size
    }

    fn nack_size(&self, nack: &StatusNack) -> u32 {
        let mut size = match self.sn_size {
            SnSize::Size12 => NACK_SN_EXT_12BIT,
            SnSize::Size18 => NACK_SN_EXT_18BIT,
        };
        if nack.has_so {
            size += NACK_SO_SIZE;
        }
        if nack.has_nack_range {
            size += NACK_RANGE_SIZE;
        }
        size
    }

    fn is_continuous_sequence(&self, left: &StatusNack, right: &StatusNack) -> bool {
        let expected = if left.has_nack_range {
            (left.nack_sn + left.nack_range as u32) % self.modulus
        } else {
            (left.nack_sn + 1) % self.modulus
        };
        if right.nack_sn != expected {
            return false;
        }
        if left.has_so && left.so_end != SO_END_OF_SDU {
            return false;
        }
        if right.has_so && right.so_start != 0 {
            return false;
        }
        true
    }

    /// Range accumulation a merge of `left` and `right` would produce, or `None` if the merged
    /// range would exceed the 1-byte `nack_range` field (255).
    fn merged_range(left: &StatusNack, right: &StatusNack) -> Option<u8> {
        let left_span: u32 = if left.has_nack_range {
            left.nack_range as u32
        } else {
            1
        };
        let right_span: u32 = if right.has_nack_range {
            right.nack_range as u32
        } else {
            1
        };
        let total = left_span + right_span;
        if total > 255 {
            None
        } else {
            Some(total as u8)
        }
    }

    /// Appends `nack`, merging it into the previous entry in place when they form a continuous
    /// run and the combined range still fits in a byte.
    pub fn push_nack(&mut self, nack: StatusNack) {
        let mergeable = match self.nacks.last() {
            Some(prev) => {
                self.is_continuous_sequence(prev, &nack) && Self::merged_range(prev, &nack).is_some()
            }
            None => false,
        };

        if !mergeable {
            self.packed_size += self.nack_size(&nack);
            self.nacks.push(nack);
            return;
        }

        let prev = self.nacks.last_mut().unwrap();
        let new_range = Self::merged_range(prev, &nack).unwrap();
        self.packed_size -= {
            let mut size = match self.sn_size {
                SnSize::Size12 => NACK_SN_EXT_12BIT,
                SnSize::Size18 => NACK_SN_EXT_18BIT,
            };
            if prev.has_so {
                size += NACK_SO_SIZE;
            }
            if prev.has_nack_range {
                size += NACK_RANGE_SIZE;
            }
            size
        };

        prev.has_nack_range = true;
        prev.nack_range = new_range;

        if nack.has_so {
            if !prev.has_so {
                prev.has_so = true;
                prev.so_start = 0;
            }
            prev.so_end = nack.so_end;
        } else if prev.has_so {
            prev.so_end = SO_END_OF_SDU;
        }

        let prev_size = {
            let prev = self.nacks.last().unwrap();
            self.nack_size(prev)
        };
        self.packed_size += prev_size;
    }

    /// Drops trailing NACKs until the packed size fits in `max_packed_size`. Returns `false`
    /// only when `max_packed_size` can't even hold the bare header.
    pub fn trim(&mut self, max_packed_size: u32) -> bool {
        if max_packed_size >= self.packed_size {
            return true;
        }
        if max_packed_size < HEADER_SIZE {
            return false;
        }
        while let Some(last) = self.nacks.last() {
            if max_packed_size >= self.packed_size && last.nack_sn != self.ack_sn {
                break;
            }
            let last = self.nacks.pop().unwrap();
            self.packed_size -= self.nack_size(&last);
            self.ack_sn = last.nack_sn;
        }
        true
    }

    fn is_control_pdu(byte0: u8) -> bool {
        (byte0 >> 7) & 0x01 == 0
    }

    pub fn pack(&self, buf: &mut [u8]) -> usize {
        match self.sn_size {
            SnSize::Size12 => self.pack_12bit(buf),
            SnSize::Size18 => self.pack_18bit(buf),
        }
    }

    fn pack_12bit(&self, buf: &mut [u8]) -> usize {
        let needed = self.packed_size as usize;
        assert!(buf.len() >= needed, "pack: buffer too small for status PDU");

        buf[0] = ((self.ack_sn >> 8) & 0x0f) as u8;
        buf[1] = (self.ack_sn & 0xff) as u8;
        buf[2] = if self.nacks.is_empty() { 0x00 } else { 0x80 };

        let mut idx = 3;
        let n = self.nacks.len();
        for (i, nack) in self.nacks.iter().enumerate() {
            buf[idx] = ((nack.nack_sn >> 4) & 0xff) as u8;
            let mut flags = ((nack.nack_sn & 0x0f) as u8) << 4;
            if i + 1 < n {
                flags |= 0x08;
            }
            if nack.has_so {
                flags |= 0x04;
            }
            if nack.has_nack_range {
                flags |= 0x02;
            }
            buf[idx + 1] = flags;
            idx += 2;
            if nack.has_so {
                buf[idx] = (nack.so_start >> 8) as u8;
                buf[idx + 1] = (nack.so_start & 0xff) as u8;
                buf[idx + 2] = (nack.so_end >> 8) as u8;
                buf[idx + 3] = (nack.so_end & 0xff) as u8;
                idx += 4;
            }
            if nack.has_nack_range {
                buf[idx] = nack.nack_range;
                idx += 1;
            }
        }
        idx
    }

    fn pack_18bit(&self, buf: &mut [u8]) -> usize {
        let needed = self.packed_size as usize;
        assert!(buf.len() >= needed, "pack: buffer too small for status PDU");

        buf[0] = ((self.ack_sn >> 14) & 0x0f) as u8;
        buf[1] = ((self.ack_sn >> 6) & 0xff) as u8;
        buf[2] = (((self.ack_sn << 2) & 0xfc) as u8)
            | if self.nacks.is_empty() { 0x00 } else { 0x02 };

        let mut idx = 3;
        let n = self.nacks.len();
        for (i, nack) in self.nacks.iter().enumerate() {
            buf[idx] = ((nack.nack_sn >> 10) & 0xff) as u8;
            buf[idx + 1] = ((nack.nack_sn >> 2) & 0xff) as u8;
            let mut flags = (((nack.nack_sn << 6) & 0xc0) as u8) & 0xc0;
            if i + 1 < n {
                flags |= 0x20;
            }
            if nack.has_so {
                flags |= 0x10;
            }
            if nack.has_nack_range {
                flags |= 0x08;
            }
            buf[idx + 2] = flags;
            idx += 3;
            if nack.has_so {
                buf[idx] = (nack.so_start >> 8) as u8;
                buf[idx + 1] = (nack.so_start & 0xff) as u8;
                buf[idx + 2] = (nack.so_end >> 8) as u8;
                buf[idx + 3] = (nack.so_end & 0xff) as u8;
                idx += 4;
            }
            if nack.has_nack_range {
                buf[idx] = nack.nack_range;
                idx += 1;
            }
        }
        idx
    }

    pub fn unpack(sn_size: SnSize, bytes: &[u8]) -> Result<Self, StatusError> {
        match sn_size {
            SnSize::Size12 => Self::unpack_12bit(bytes),
            SnSize::Size18 => Self::unpack_18bit(bytes),
        }
    }

    fn unpack_12bit(bytes: &[u8]) -> Result<Self, StatusError> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(StatusError::TooShort);
        }
        if !Self::is_control_pdu(bytes[0]) {
            return Err(StatusError::NotControlPdu);
        }
        let cpt = (bytes[0] >> 4) & 0x07;
        if cpt != 0 {
            return Err(StatusError::UnsupportedCpt);
        }

        let mut pdu = Self::new(SnSize::Size12);
        let ack_sn = ((bytes[0] & 0x0f) as u32) << 8 | bytes[1] as u32;
        pdu.ack_sn = ack_sn;

        let mut e1 = bytes[2] & 0x80;
        if bytes[2] & 0x7f != 0 {
            return Err(StatusError::ReservedBitsSet);
        }

        let mut idx = 3;
        while e1 != 0 {
            if bytes.len() < idx + NACK_SN_EXT_12BIT as usize {
                return Err(StatusError::TruncatedNack);
            }
            let mut nack_sn = (bytes[idx] as u32) << 4;
            let b1 = bytes[idx + 1];
            e1 = b1 & 0x08;
            let e2 = b1 & 0x04;
            let e3 = b1 & 0x02;
            if b1 & 0x01 != 0 {
                return Err(StatusError::ReservedBitsSet);
            }
            nack_sn |= (b1 as u32 & 0xf0) >> 4;
            idx += 2;

            let mut nack = StatusNack {
                nack_sn,
                ..Default::default()
            };
            if e2 != 0 {
                if bytes.len() < idx + NACK_SO_SIZE as usize {
                    return Err(StatusError::TruncatedNack);
                }
                nack.has_so = true;
                nack.so_start = (bytes[idx] as u16) << 8 | bytes[idx + 1] as u16;
                nack.so_end = (bytes[idx + 2] as u16) << 8 | bytes[idx + 3] as u16;
                idx += 4;
            }
            if e3 != 0 {
                if bytes.len() < idx + NACK_RANGE_SIZE as usize {
                    return Err(StatusError::TruncatedNack);
                }
                nack.has_nack_range = true;
                nack.nack_range = bytes[idx];
                idx += 1;
            }
            pdu.push_nack(nack);
        }
        Ok(pdu)
    }

    fn unpack_18bit(bytes: &[u8]) -> Result<Self, StatusError> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(StatusError::TooShort);
        }
        if !Self::is_control_pdu(bytes[0]) {
            return Err(StatusError::NotControlPdu);
        }
        let cpt = (bytes[0] >> 4) & 0x07;
        if cpt != 0 {
            return Err(StatusError::UnsupportedCpt);
        }

        let mut pdu = Self::new(SnSize::Size18);
        let mut ack_sn = ((bytes[0] & 0x0f) as u32) << 14;
        ack_sn |= (bytes[1] as u32) << 6;
        ack_sn |= (bytes[2] as u32 & 0xfc) >> 2;
        pdu.ack_sn = ack_sn;

        let mut e1 = bytes[2] & 0x02;
        if bytes[2] & 0x01 != 0 {
            return Err(StatusError::ReservedBitsSet);
        }

        let mut idx = 3;
        while e1 != 0 {
            if bytes.len() < idx + NACK_SN_EXT_18BIT as usize {
                return Err(StatusError::TruncatedNack);
            }
            let mut nack_sn = (bytes[idx] as u32) << 10;
            nack_sn |= (bytes[idx + 1] as u32) << 2;
            let b2 = bytes[idx + 2];
            nack_sn |= (b2 as u32 & 0xc0) >> 6;
            e1 = b2 & 0x20;
            let e2 = b2 & 0x10;
            let e3 = b2 & 0x08;
            if b2 & 0x07 != 0 {
                return Err(StatusError::ReservedBitsSet);
            }
            idx += 3;

            let mut nack = StatusNack {
                nack_sn,
                ..Default::default()
            };
            if e2 != 0 {
                if bytes.len() < idx + NACK_SO_SIZE as usize {
                    return Err(StatusError::TruncatedNack);
                }
                nack.has_so = true;
                nack.so_start = (bytes[idx] as u16) << 8 | bytes[idx + 1] as u16;
                nack.so_end = (bytes[idx + 2] as u16) << 8 | bytes[idx + 3] as u16;
                idx += 4;
            }
            if e3 != 0 {
                if bytes.len() < idx + NACK_RANGE_SIZE as usize {
                    return Err(StatusError::TruncatedNack);
                }
                nack.has_nack_range = true;
                nack.nack_range = bytes[idx];
                idx += 1;
            }
            pdu.push_nack(nack);
        }
        Ok(pdu)
    }
}
