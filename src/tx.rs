//! Transmitting side of the AM entity (TS 38.322 §5.2.2, §5.3.2-3, §7.1 TX state variables).
//!
//! Ported from `rlc_tx_am_entity`: SDUs arrive via [`TxAmEntity::handle_sdu`], [`pull_pdu`] turns
//! them (and any pending retransmissions or status report) into a PDU that fits a caller-supplied
//! grant, and [`on_status_pdu`] (reached through the [`TxAmStatusHandler`] trait) folds a peer's
//! status report into the ACK edge and the ReTx queue.
//!
//! Every path that posts a task to the executor (a timer re-arm, a coalesced buffer-state
//! notification) does so only after dropping its own `inner` lock first. `SameThreadExecutor`
//! runs posted tasks inline, and those tasks re-lock `inner` themselves (e.g. to deliver a timer
//! expiry) — posting while still holding the lock would self-deadlock on the very same mutex.
//!
//! [`pull_pdu`]: TxAmEntity::pull_pdu
//! [`on_status_pdu`]: TxAmStatusHandler::on_status_pdu

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::TxConfig;
use crate::error::ConfigError;
use crate::executor::Executor;
use crate::interconnect::{
    LowerLayerBufferNotifier, RxAmStatusProvider, TxAmStatusHandler, TxAmStatusNotifier,
    UpperLayerControl,
};
use crate::metrics::TxMetrics;
use crate::pdu::{header, AmHeader, AmStatusPdu, SegmentInfo, StatusNack, SO_END_OF_SDU};
use crate::retx_queue::{RetxDescriptor, RetxQueue};
use crate::sn::{self, SnSize};
use crate::window::SduWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxState {
    pub tx_next_ack: u32,
    pub tx_next: u32,
    pub poll_sn: u32,
    pub pdu_without_poll: u32,
    pub byte_without_poll: u64,
}

#[derive(Debug, Clone)]
struct QueuedSdu {
    sdu: Bytes,
    upper_sn: Option<u32>,
}

#[derive(Debug, Clone)]
struct TxSduInfo {
    sdu: Bytes,
    upper_sn: Option<u32>,
    next_send_offset: u32,
    /// `None` until the first retransmission of this SDU; then a running count.
    retx_count: Option<u32>,
}

/// Splits a (possibly range-compressed) NACK into one entry per covered SN. Only the first and
/// last SN of a multi-SN range can carry a partial SO (the merge policy in `pdu/status.rs` only
/// ever attaches SO to the outer edges of a run); SNs strictly inside the run are wholly missing.
fn decompose_nack(nack: &StatusNack, modulus: u32) -> Vec<(u32, Option<(u16, u16)>)> {
    let range = if nack.has_nack_range {
        nack.nack_range as u32
    } else {
        1
    };
    let mut out = Vec::with_capacity(range as usize);
    for i in 0..range {
        let sn_i = (nack.nack_sn + i) % modulus;
        let so = if !nack.has_so {
            None
        } else if range == 1 {
            Some((nack.so_start, nack.so_end))
        } else if i == 0 {
            Some((nack.so_start, SO_END_OF_SDU))
        } else if i == range - 1 {
            Some((0, nack.so_end))
        } else {
            None
        };
        out.push((sn_i, so));
    }
    out
}

struct TxInner {
    sn_size: SnSize,
    modulus: u32,
    window_size: u32,
    max_retx_thresh: u32,
    poll_pdu: u32,
    poll_byte: u64,
    queue_sdu_count: usize,
    queue_bytes: usize,
    t_poll_retx_ms: u64,
    st: TxState,
    tx_window: SduWindow<TxSduInfo>,
    sdu_queue: VecDeque<QueuedSdu>,
    sdu_queue_bytes: usize,
    retx_queue: RetxQueue,
    /// SN currently being segmented across multiple `pull_pdu` calls, if any.
    segmentation_sn: Option<u32>,
    /// Set when t-PollRetransmit pushed a sentinel retx; forces P=1 on the PDU that consumes it.
    poll_retransmit_due: bool,
    poll_retx_running: bool,
    poll_retx_epoch: u64,
    metrics: TxMetrics,
    upper: Box<dyn UpperLayerControl>,
    lower: Box<dyn LowerLayerBufferNotifier>,
}

impl TxInner {
    fn tx_mod_base(&self, sn: u32) -> u32 {
        sn::rebase(sn, self.st.tx_next_ack, self.modulus)
    }

    fn inside_tx_window(&self, sn: u32) -> bool {
        self.tx_mod_base(sn) < self.window_size
    }
}

/// Transmitting side of an AM bearer. Cheap to clone: clones share the same underlying state,
/// which is how a handle is handed to the collaborating RX entity as its status handler/notifier.
///
/// `executor` and `status_provider` are kept outside `inner`'s mutex deliberately: both are read
/// (to post a task, or to pull a status report) from code paths that must not already be holding
/// `inner`'s lock, and keeping them as independent fields makes that easy to get right instead of
/// threading a borrow of `inner` through every caller.
pub struct TxAmEntity {
    inner: Arc<Mutex<TxInner>>,
    buffer_update_pending: Arc<AtomicBool>,
    executor: Arc<dyn Executor>,
    status_provider: Arc<dyn RxAmStatusProvider>,
}

impl Clone for TxAmEntity {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            buffer_update_pending: self.buffer_update_pending.clone(),
            executor: self.executor.clone(),
            status_provider: self.status_provider.clone(),
        }
    }
}

impl TxAmEntity {
    pub fn new(
        cfg: TxConfig,
        executor: Arc<dyn Executor>,
        status_provider: Box<dyn RxAmStatusProvider>,
        upper: Box<dyn UpperLayerControl>,
        lower: Box<dyn LowerLayerBufferNotifier>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let sn_size = cfg.sn_size()?;
        let inner = TxInner {
            sn_size,
            modulus: sn_size.modulus(),
            window_size: sn_size.window_size(),
            max_retx_thresh: cfg.max_retx_thresh,
            poll_pdu: cfg.poll_pdu,
            poll_byte: cfg.poll_byte,
            queue_sdu_count: cfg.queue_sdu_count,
            queue_bytes: cfg.queue_bytes,
            t_poll_retx_ms: cfg.t_poll_retx_ms,
            st: TxState::default(),
            tx_window: SduWindow::new(cfg.max_window),
            sdu_queue: VecDeque::new(),
            sdu_queue_bytes: 0,
            retx_queue: RetxQueue::new(cfg.max_window),
            segmentation_sn: None,
            poll_retransmit_due: false,
            poll_retx_running: false,
            poll_retx_epoch: 0,
            metrics: TxMetrics::default(),
            upper,
            lower,
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            buffer_update_pending: Arc::new(AtomicBool::new(false)),
            executor,
            status_provider: Arc::from(status_provider),
        })
    }

    pub fn metrics(&self) -> TxMetrics {
        self.inner.lock().unwrap().metrics.snapshot()
    }

    pub fn state(&self) -> TxState {
        self.inner.lock().unwrap().st
    }

    #[doc(hidden)]
    pub fn set_state(&self, st: TxState) {
        self.inner.lock().unwrap().st = st;
    }

    /// Pushes `sdu` onto the TX SDU queue, subject to its count/byte capacity. `upper_sn` is the
    /// upper-layer (e.g. PDCP) sequence number carried through to `on_delivered_sdu`.
    pub fn handle_sdu(&self, sdu: Bytes, upper_sn: Option<u32>) {
        let accepted = {
            let mut inner = self.inner.lock().unwrap();
            if inner.sdu_queue.len() >= inner.queue_sdu_count
                || inner.sdu_queue_bytes + sdu.len() > inner.queue_bytes
            {
                inner.metrics.sdu_queue_drops += 1;
                warn!(bytes = sdu.len(), "dropped SDU: TX queue at capacity");
                false
            } else {
                inner.sdu_queue_bytes += sdu.len();
                inner.metrics.sdus_submitted += 1;
                inner.sdu_queue.push_back(QueuedSdu { sdu, upper_sn });
                true
            }
        };
        if accepted {
            self.request_buffer_state_update();
        }
    }

    /// Removes a queued SDU by its upper-layer SN, provided it has not yet been assigned an RLC
    /// SN (i.e. it is still sitting in the SDU queue, not the TX window).
    pub fn discard_sdu(&self, upper_sn: u32) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(pos) = inner
                .sdu_queue
                .iter()
                .position(|q| q.upper_sn == Some(upper_sn))
            {
                let removed = inner.sdu_queue.remove(pos).unwrap();
                inner.sdu_queue_bytes -= removed.sdu.len();
                debug!(upper_sn, "discarded queued SDU");
            } else {
                inner.metrics.discard_failures += 1;
                inner.upper.on_discard_failure(upper_sn);
                debug!(upper_sn, "discard_sdu failed: not queued, or already assigned an RLC SN");
            }
        }
        self.request_buffer_state_update();
    }

    /// Writes the next PDU into `grant`, returning the number of bytes written (0 if there is
    /// nothing to send). Selection order: pending status report, then retransmission, then a
    /// continuation of an in-progress segmentation, then a new SDU.
    pub fn pull_pdu(&self, grant: &mut [u8]) -> usize {
        if self.status_provider.status_report_required() {
            if let Some(n) = self.build_status_pdu(grant) {
                return n;
            }
        }

        let mut poll_needs_arm = false;
        let n = {
            let mut inner = self.inner.lock().unwrap();

            if !inner.retx_queue.is_empty() {
                let (n, poll) = self.build_retransmission(&mut inner, grant).unwrap_or((0, false));
                poll_needs_arm = poll;
                n
            } else if inner.segmentation_sn.is_some() {
                let (n, poll) = self.build_continuation(&mut inner, grant);
                poll_needs_arm = poll;
                n
            } else if !inner.sdu_queue.is_empty() && inner.tx_mod_base(inner.st.tx_next) < inner.window_size {
                let (n, poll) = self.build_new_sdu(&mut inner, grant);
                poll_needs_arm = poll;
                n
            } else {
                0
            }
        };

        if poll_needs_arm {
            self.arm_poll_retx_timer();
        }
        n
    }

    fn build_status_pdu(&self, grant: &mut [u8]) -> Option<usize> {
        let mut status = self.status_provider.status_pdu();
        let needed = status.packed_size() as usize;
        if grant.len() >= needed {
            let n = status.pack(grant);
            trace!(bytes = n, "sent status report");
            return Some(n);
        }
        if grant.len() >= 3 && status.trim(grant.len() as u32) {
            let n = status.pack(grant);
            trace!(bytes = n, "sent trimmed status report");
            return Some(n);
        }
        None
    }

    /// Attempts to build a retransmission PDU from the front of the ReTx queue, dropping any
    /// number of stale/clipped-to-nothing entries along the way. Returns `None` when either the
    /// queue drained to empty without anything fitting, or the grant is too small for even a
    /// partial retransmission of the eventual front entry — in both cases `pull_pdu` emits
    /// nothing this call, per §4.6.3. The returned bool reports whether the emitted PDU set the
    /// poll bit (and therefore needs t-PollRetransmit (re)armed by the caller, once it has
    /// dropped `inner`'s lock).
    fn build_retransmission(&self, inner: &mut TxInner, grant: &mut [u8]) -> Option<(usize, bool)> {
        loop {
            let retx = *inner.retx_queue.front()?;

            let sdu_len = match inner.tx_window.get(retx.sn) {
                Some(s) => s.sdu.len() as u32,
                None => {
                    inner.retx_queue.pop();
                    continue;
                }
            };
            if retx.so >= sdu_len {
                inner.retx_queue.pop();
                trace!(sn = retx.sn, so = retx.so, "dropped out-of-bounds retx");
                continue;
            }

            let next_send_offset = inner.tx_window.get(retx.sn).unwrap().next_send_offset;
            let mut len = retx.length;
            if next_send_offset < retx.so + len {
                len = next_send_offset.saturating_sub(retx.so);
            }
            len = len.min(sdu_len - retx.so);
            if len == 0 {
                inner.retx_queue.pop();
                trace!(sn = retx.sn, so = retx.so, "dropped retx clipped to zero length");
                continue;
            }

            let so = retx.so;
            let min_hdr = header::min_header_size(inner.sn_size);
            let hdr_size = if so == 0 { min_hdr } else { min_hdr + 2 };
            let forced_poll = inner.poll_retransmit_due;

            if grant.len() >= hdr_size + len as usize {
                let si = if so == 0 && len == sdu_len {
                    SegmentInfo::Full
                } else if so == 0 {
                    SegmentInfo::First
                } else if so + len == sdu_len {
                    SegmentInfo::Last
                } else {
                    SegmentInfo::Middle
                };
                let sn = retx.sn;
                let payload = inner
                    .tx_window
                    .get(sn)
                    .unwrap()
                    .sdu
                    .slice(so as usize..(so + len) as usize);

                let hdr = AmHeader {
                    dc: true,
                    poll: false,
                    si,
                    sn_size: inner.sn_size,
                    sn,
                    so: if si.carries_so() { Some(so as u16) } else { None },
                };
                let hdr_written = header::write(grant, &hdr);
                grant[hdr_written..hdr_written + payload.len()].copy_from_slice(&payload);
                let total = hdr_written + payload.len();

                inner.retx_queue.pop();
                if forced_poll {
                    inner.poll_retransmit_due = false;
                }

                let max_retx_thresh = inner.max_retx_thresh;
                let (retx_count, upper_sn) = {
                    let s = inner.tx_window.get_mut(sn).unwrap();
                    s.retx_count = Some(s.retx_count.unwrap_or(0) + 1);
                    (s.retx_count.unwrap(), s.upper_sn)
                };
                if retx_count >= max_retx_thresh {
                    inner.metrics.max_retx_events += 1;
                    inner.upper.on_max_retx(upper_sn);
                    warn!(sn, retx_count, "max retransmissions reached");
                }
                inner.metrics.retransmissions += 1;

                let completes_sdu = matches!(si, SegmentInfo::Full | SegmentInfo::Last);
                let poll = self.finalize_data_pdu(inner, &mut grant[..total], completes_sdu, forced_poll);
                return Some((total, poll));
            }

            if grant.len() <= hdr_size {
                return None;
            }
            let payload_len = (grant.len() - hdr_size) as u32;
            let si = if so == 0 {
                SegmentInfo::First
            } else {
                SegmentInfo::Middle
            };
            let sn = retx.sn;
            let payload = inner
                .tx_window
                .get(sn)
                .unwrap()
                .sdu
                .slice(so as usize..(so + payload_len) as usize);

            let hdr = AmHeader {
                dc: true,
                poll: false,
                si,
                sn_size: inner.sn_size,
                sn,
                so: if si.carries_so() { Some(so as u16) } else { None },
            };
            let hdr_written = header::write(grant, &hdr);
            grant[hdr_written..hdr_written + payload.len()].copy_from_slice(&payload);
            let total = hdr_written + payload.len();

            inner.retx_queue.replace_front(RetxDescriptor {
                sn,
                so: so + payload_len,
                length: len - payload_len,
            });
            if forced_poll {
                inner.poll_retransmit_due = false;
            }
            inner.metrics.retransmissions += 1;

            let poll = self.finalize_data_pdu(inner, &mut grant[..total], false, forced_poll);
            return Some((total, poll));
        }
    }

    fn build_continuation(&self, inner: &mut TxInner, grant: &mut [u8]) -> (usize, bool) {
        let sn = inner.segmentation_sn.unwrap();
        let min_hdr = header::min_header_size(inner.sn_size);
        let hdr_size = min_hdr + 2;
        if grant.len() <= hdr_size {
            return (0, false);
        }

        let (sdu_len, next_send_offset, sdu) = {
            let s = inner.tx_window.get(sn).unwrap();
            (s.sdu.len() as u32, s.next_send_offset, s.sdu.clone())
        };
        let remaining = sdu_len - next_send_offset;
        let available = (grant.len() - hdr_size) as u32;
        let (si, payload_len) = if available >= remaining {
            (SegmentInfo::Last, remaining)
        } else {
            (SegmentInfo::Middle, available)
        };

        let so = next_send_offset;
        let payload = sdu.slice(so as usize..(so + payload_len) as usize);
        let hdr = AmHeader {
            dc: true,
            poll: false,
            si,
            sn_size: inner.sn_size,
            sn,
            so: Some(so as u16),
        };
        let hdr_written = header::write(grant, &hdr);
        grant[hdr_written..hdr_written + payload.len()].copy_from_slice(&payload);
        let total = hdr_written + payload.len();

        {
            let s = inner.tx_window.get_mut(sn).unwrap();
            s.next_send_offset += payload_len;
        }
        let completes = matches!(si, SegmentInfo::Last);
        if completes {
            inner.segmentation_sn = None;
        }

        let poll = self.finalize_data_pdu(inner, &mut grant[..total], completes, false);
        (total, poll)
    }

    fn build_new_sdu(&self, inner: &mut TxInner, grant: &mut [u8]) -> (usize, bool) {
        let min_hdr = header::min_header_size(inner.sn_size);
        if grant.len() <= min_hdr {
            return (0, false);
        }

        let queued = inner.sdu_queue.pop_front().unwrap();
        inner.sdu_queue_bytes -= queued.sdu.len();
        let sn = inner.st.tx_next;
        inner.st.tx_next = (inner.st.tx_next + 1) % inner.modulus;

        let sdu_len = queued.sdu.len() as u32;
        let full_fits = grant.len() >= min_hdr + sdu_len as usize;
        let (si, payload_len) = if full_fits {
            (SegmentInfo::Full, sdu_len)
        } else {
            (SegmentInfo::First, (grant.len() - min_hdr) as u32)
        };

        let payload = queued.sdu.slice(0..payload_len as usize);
        let hdr = AmHeader {
            dc: true,
            poll: false,
            si,
            sn_size: inner.sn_size,
            sn,
            so: None,
        };
        let hdr_written = header::write(grant, &hdr);
        grant[hdr_written..hdr_written + payload.len()].copy_from_slice(&payload);
        let total = hdr_written + payload.len();

        let completes = matches!(si, SegmentInfo::Full);
        inner.tx_window.insert(
            sn,
            TxSduInfo {
                sdu: queued.sdu,
                upper_sn: queued.upper_sn,
                next_send_offset: payload_len,
                retx_count: None,
            },
        );
        if !completes {
            inner.segmentation_sn = Some(sn);
        }

        let poll = self.finalize_data_pdu(inner, &mut grant[..total], completes, false);
        (total, poll)
    }

    /// Common tail of every data-PDU-building path: poll-bit decision (§4.6.2) and metrics.
    /// The header is written with `poll: false`; this patches bit 6 of the first octet in place
    /// once the final decision is known, since "nothing else to send" can only be evaluated
    /// after the queues this PDU drained have already been updated. Returns whether P was set,
    /// so the caller can (re)arm t-PollRetransmit after releasing `inner`'s lock.
    fn finalize_data_pdu(
        &self,
        inner: &mut TxInner,
        buf: &mut [u8],
        completes_sdu: bool,
        forced_poll: bool,
    ) -> bool {
        let written = buf.len();
        inner.st.pdu_without_poll += 1;
        inner.st.byte_without_poll += written as u64;

        let nothing_else = inner.sdu_queue.is_empty()
            && inner.retx_queue.is_empty()
            && completes_sdu
            && inner.segmentation_sn.is_none();

        let poll = forced_poll
            || inner.st.pdu_without_poll >= inner.poll_pdu
            || inner.st.byte_without_poll >= inner.poll_byte
            || nothing_else;

        if poll {
            buf[0] |= 0x40;
            inner.st.pdu_without_poll = 0;
            inner.st.byte_without_poll = 0;
            inner.st.poll_sn = inner.st.tx_next.wrapping_sub(1) % inner.modulus;
            debug!(poll_sn = inner.st.poll_sn, "set polling bit");
        }

        inner.metrics.pdus_sent += 1;
        inner.metrics.bytes_sent += written as u64;
        poll
    }

    fn apply_status_pdu(&self, inner: &mut TxInner, status: AmStatusPdu) {
        let base = inner.st.tx_next_ack;
        let modulus = inner.modulus;
        let w = inner.window_size;
        let ack_based = sn::rebase(status.ack_sn, base, modulus);

        if ack_based > w {
            inner.metrics.protocol_failures += 1;
            inner.upper.on_protocol_failure();
            warn!(ack_sn = status.ack_sn, tx_next_ack = base, "status PDU has invalid ACK_SN, ignoring report");
            return;
        }

        for nack in status.nacks() {
            if sn::rebase(nack.nack_sn, base, modulus) >= ack_based {
                inner.metrics.protocol_failures += 1;
                inner.upper.on_protocol_failure();
                warn!(nack_sn = nack.nack_sn, ack_sn = status.ack_sn, "NACK >= ACK_SN, ignoring report");
                return;
            }
        }

        let mut nacked: HashSet<u32> = HashSet::new();
        for nack in status.nacks() {
            for (sn_i, so_range) in decompose_nack(nack, modulus) {
                nacked.insert(sn_i);

                if sn::rebase(sn_i, base, modulus) >= w {
                    debug!(sn = sn_i, "NACK SN outside TX window, dropping");
                    continue;
                }
                let sdu_len = match inner.tx_window.get(sn_i) {
                    Some(s) => s.sdu.len() as u32,
                    None => continue,
                };
                if sdu_len == 0 {
                    continue;
                }

                let raw_start = so_range.map(|(s, _)| s as u32).unwrap_or(0);
                let raw_end = so_range
                    .map(|(_, e)| e as u32)
                    .unwrap_or(SO_END_OF_SDU as u32);
                let mut start = raw_start.min(sdu_len - 1);
                let mut end = raw_end.min(sdu_len - 1);
                if end < start {
                    std::mem::swap(&mut start, &mut end);
                }
                let length = end - start + 1;

                if inner.retx_queue.has_sn_range(sn_i, start, length) {
                    continue;
                }
                let desc = RetxDescriptor {
                    sn: sn_i,
                    so: start,
                    length,
                };
                if !inner.retx_queue.try_push(desc) {
                    inner.metrics.retx_queue_drops += 1;
                    warn!(sn = sn_i, "ReTx queue full, dropping NACK");
                }
            }
        }

        // The ACK edge only advances up to the first NACK'd SN (srsRAN's `stop_sn`): an SN that
        // is itself NACKed, or above one, must stay in the TX window for retransmission tracking.
        let stop_sn = status.nacks().first().map(|n| n.nack_sn).unwrap_or(status.ack_sn);
        let stop_based = sn::rebase(stop_sn, base, modulus);

        let mut sn_cur = base;
        while sn::rebase(sn_cur, base, modulus) < stop_based {
            if !nacked.contains(&sn_cur) {
                if let Some(info) = inner.tx_window.get(sn_cur) {
                    let upper_sn = info.upper_sn;
                    inner.tx_window.remove(sn_cur);
                    inner.retx_queue.remove_sn(sn_cur);
                    if inner.segmentation_sn == Some(sn_cur) {
                        inner.segmentation_sn = None;
                    }
                    inner.metrics.sdus_delivered += 1;
                    if let Some(usn) = upper_sn {
                        inner.upper.on_delivered_sdu(usn);
                    }
                }
            }
            sn_cur = (sn_cur + 1) % modulus;
        }
        inner.st.tx_next_ack = stop_sn;

        let poll_based = sn::rebase(inner.st.poll_sn, base, modulus);
        if ack_based >= poll_based {
            inner.poll_retx_running = false;
            inner.poll_retx_epoch += 1;
            debug!("stopped t-PollRetransmit");
        }
    }

    /// (Re)arms t-PollRetransmit. Self-contained: locks `inner` only long enough to read the
    /// configured duration and bump the epoch, then posts the delayed callback with the lock
    /// already released. Must never be called while the caller itself still holds `inner`'s lock.
    fn arm_poll_retx_timer(&self) {
        let armed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.t_poll_retx_ms == 0 {
                None
            } else {
                inner.poll_retx_running = true;
                inner.poll_retx_epoch += 1;
                Some((inner.t_poll_retx_ms, inner.poll_retx_epoch))
            }
        };
        let Some((ms, epoch)) = armed else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let this = self.clone();
        self.executor.post_delayed(
            Duration::from_millis(ms),
            Box::new(move || {
                if weak.upgrade().is_some() {
                    this.on_expired_poll_retx_timer(epoch);
                }
            }),
        );
    }

    fn on_expired_poll_retx_timer(&self, epoch: u64) {
        let stale = {
            let mut inner = self.inner.lock().unwrap();
            if inner.poll_retx_epoch != epoch || !inner.poll_retx_running {
                debug!("t-PollRetransmit already restarted/stopped, skipping stale expiry");
                true
            } else {
                if inner.sdu_queue.is_empty() && inner.retx_queue.is_empty() {
                    let mut candidate = None;
                    let mut sn_i = inner.st.tx_next_ack;
                    let mut scanned = 0u32;
                    while scanned < inner.window_size {
                        if inner.tx_window.contains(sn_i) {
                            candidate = Some(sn_i);
                            break;
                        }
                        sn_i = (sn_i + 1) % inner.modulus;
                        scanned += 1;
                    }
                    if let Some(sn_i) = candidate {
                        inner
                            .retx_queue
                            .try_push(RetxDescriptor { sn: sn_i, so: 0, length: 1 });
                        inner.poll_retransmit_due = true;
                        if let Some(s) = inner.tx_window.get_mut(sn_i) {
                            s.retx_count = Some(s.retx_count.unwrap_or(0) + 1);
                        }
                        debug!(sn = sn_i, "t-PollRetransmit expired, scheduled poll retransmission");
                    }
                }
                false
            }
        };
        if stale {
            return;
        }

        self.arm_poll_retx_timer();
        self.request_buffer_state_update();
    }

    /// Coalesces buffer-state notifications: while one is already queued, further requests are
    /// no-ops, and the task that clears the pending flag re-reads the then-current buffer state.
    /// Self-contained for the same reason as [`Self::arm_poll_retx_timer`]: must only be called
    /// with `inner`'s lock already released.
    fn request_buffer_state_update(&self) {
        if self.buffer_update_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = self.buffer_update_pending.clone();
        let weak = Arc::downgrade(&self.inner);
        let status_provider = self.status_provider.clone();
        self.executor.post(Box::new(move || {
            pending.store(false, Ordering::Release);
            if let Some(inner_arc) = weak.upgrade() {
                let mut inner = inner_arc.lock().unwrap();
                let bytes = Self::compute_buffer_state(&inner, status_provider.as_ref());
                inner.lower.on_buffer_state_update(bytes);
            }
        }));
    }

    fn compute_buffer_state(inner: &TxInner, status_provider: &dyn RxAmStatusProvider) -> u32 {
        let status_bytes: u64 = if status_provider.status_report_required() {
            status_provider.status_pdu_len() as u64
        } else {
            0
        };

        let min_hdr = header::min_header_size(inner.sn_size) as u64;
        let retx_state = inner.retx_queue.state();
        let retx_bytes = retx_state.retx_bytes
            + retx_state.n_retx_so_zero as u64 * min_hdr
            + retx_state.n_retx_so_nonzero as u64 * (min_hdr + 2);

        let seg_bytes = inner
            .segmentation_sn
            .and_then(|sn| inner.tx_window.get(sn))
            .map(|s| (s.sdu.len() as u64 - s.next_send_offset as u64) + min_hdr + 2)
            .unwrap_or(0);

        let sdu_queue_bytes = inner.sdu_queue_bytes as u64 + inner.sdu_queue.len() as u64 * min_hdr;

        (status_bytes + retx_bytes + seg_bytes + sdu_queue_bytes) as u32
    }

    /// Current estimate of bytes this entity would emit if granted unlimited space, per §4.6.7.
    pub fn buffer_state(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        Self::compute_buffer_state(&inner, self.status_provider.as_ref())
    }
}

impl TxAmStatusHandler for TxAmEntity {
    fn on_status_pdu(&mut self, status: AmStatusPdu) {
        {
            let mut inner = self.inner.lock().unwrap();
            self.apply_status_pdu(&mut inner, status);
        }
        self.request_buffer_state_update();
    }
}

impl TxAmStatusNotifier for TxAmEntity {
    fn on_status_report_changed(&mut self) {
        self.request_buffer_state_update();
    }
}
