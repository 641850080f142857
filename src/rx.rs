//! Receiving side of the AM entity (TS 38.322 §5.2.3, §5.3.4, §7.1 RX state variables).
//!
//! Ported from `rlc_rx_am_entity`: PDUs arrive via [`RxAmEntity::handle_pdu`], data PDUs are
//! reassembled into SDUs and handed to the upper layer, and a running status report is kept
//! up to date so the collaborating TX entity can pull it whenever a grant lets it send one.
//!
//! The entity is shared with the timer callbacks t-Reassembly/t-StatusProhibit schedule onto
//! the executor, so all mutable state lives behind one `Mutex` rather than mirroring the
//! original's per-field atomics — this crate has no equivalent of the original's pcell/ue
//! executor split to make a lock-free single-writer design pay for itself.
//!
//! `executor` lives outside that mutex, on the entity itself: `arm_reassembly_timer` and
//! `arm_status_prohibit_timer` only ever take a brief lock to read config and bump bookkeeping,
//! then post with the lock already released. `SameThreadExecutor` runs posted tasks inline, and
//! those tasks re-lock `inner` to deliver the timer expiry — arming while still holding the
//! caller's own guard would self-deadlock on the same mutex.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::config::RxConfig;
use crate::error::ConfigError;
use crate::executor::Executor;
use crate::interconnect::{RxAmStatusProvider, TxAmStatusHandler, TxAmStatusNotifier, UpperLayerDataSink};
use crate::metrics::RxMetrics;
use crate::pdu::{header, AmHeader, AmStatusPdu, SegmentInfo, StatusNack};
use crate::sn::{self, SnSize};
use crate::window::SduWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxState {
    pub rx_next: u32,
    pub rx_next_status_trigger: u32,
    pub rx_highest_status: u32,
    pub rx_next_highest: u32,
}

#[derive(Debug, Clone)]
struct RxSegment {
    so: u32,
    is_last: bool,
    payload: Bytes,
}

#[derive(Debug, Clone, Default)]
struct RxSduInfo {
    fully_received: bool,
    has_gap: bool,
    full_sdu: Option<Bytes>,
    segments: Vec<RxSegment>,
}

/// Inserts `new_segment` into `segments` (kept sorted by SO with no byte overlap), trimming or
/// dropping whichever side loses the overlap. Mirrors `rlc_rx_am_entity::store_segment`, with a
/// `Vec` index standing in for the `std::set` iterator dance.
fn store_segment(segments: &mut Vec<RxSegment>, mut new_segment: RxSegment) -> bool {
    let mut idx = 0;
    while idx < segments.len() {
        let cur_so = segments[idx].so;
        let cur_last_byte = cur_so + segments[idx].payload.len() as u32 - 1;
        let new_last_byte = new_segment.so + new_segment.payload.len() as u32 - 1;

        if new_segment.so > cur_last_byte {
            idx += 1;
            continue;
        }
        if new_segment.so >= cur_so {
            if new_last_byte <= cur_last_byte {
                return false;
            }
            let trim = (cur_last_byte + 1 - new_segment.so) as usize;
            new_segment.payload = new_segment.payload.slice(trim..);
            new_segment.so = cur_last_byte + 1;
            idx += 1;
            continue;
        }
        if new_last_byte < cur_so {
            break;
        }
        if new_last_byte < cur_last_byte {
            let trim = (new_last_byte + 1 - cur_so) as usize;
            let cut = RxSegment {
                so: new_last_byte + 1,
                is_last: segments[idx].is_last,
                payload: segments[idx].payload.slice(trim..),
            };
            segments[idx] = cut;
            segments.insert(idx, new_segment);
            return true;
        }
        segments.remove(idx);
    }
    segments.insert(idx, new_segment);
    true
}

fn update_segment_inventory(info: &mut RxSduInfo) {
    if info.segments.is_empty() {
        info.fully_received = false;
        info.has_gap = false;
        return;
    }
    let mut next_byte = 0u32;
    for seg in &info.segments {
        if seg.so != next_byte {
            info.has_gap = true;
            info.fully_received = false;
            return;
        }
        if seg.is_last {
            info.has_gap = false;
            info.fully_received = true;
            return;
        }
        next_byte += seg.payload.len() as u32;
    }
    info.has_gap = false;
    info.fully_received = false;
}

fn reassemble(info: &RxSduInfo) -> Bytes {
    if let Some(full) = &info.full_sdu {
        return full.clone();
    }
    let total: usize = info.segments.iter().map(|s| s.payload.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for seg in &info.segments {
        buf.extend_from_slice(&seg.payload);
    }
    buf.freeze()
}

struct RxInner {
    sn_size: SnSize,
    modulus: u32,
    window_size: u32,
    t_reassembly_ms: u64,
    t_status_prohibit_ms: u64,
    st: RxState,
    rx_window: SduWindow<RxSduInfo>,
    status_report: AmStatusPdu,
    do_status: bool,
    status_prohibit_running: bool,
    reassembly_running: bool,
    reassembly_epoch: u64,
    status_prohibit_epoch: u64,
    metrics: RxMetrics,
    upper: Box<dyn UpperLayerDataSink>,
    status_handler: Option<Box<dyn TxAmStatusHandler>>,
    status_notifier: Option<Box<dyn TxAmStatusNotifier>>,
}

impl RxInner {
    fn rx_mod_base(&self, sn: u32) -> u32 {
        sn::rebase(sn, self.st.rx_next, self.modulus)
    }

    fn inside_rx_window(&self, sn: u32) -> bool {
        self.rx_mod_base(sn) < self.window_size
    }

    fn valid_ack_sn(&self, sn: u32) -> bool {
        let based = self.rx_mod_base(sn);
        based > 0 && based <= self.window_size
    }

    fn entry_mut(&mut self, sn: u32) -> &mut RxSduInfo {
        if !self.rx_window.contains(sn) {
            self.rx_window.insert(sn, RxSduInfo::default());
        }
        self.rx_window.get_mut(sn).unwrap()
    }

    fn handle_full_data_sdu(&mut self, header: &AmHeader, payload: Bytes) {
        let entry = self.entry_mut(header.sn);
        entry.segments.clear();
        entry.full_sdu = Some(payload);
        entry.fully_received = true;
        entry.has_gap = false;
    }

    fn handle_segment_data_sdu(&mut self, header: &AmHeader, payload: Bytes) -> bool {
        let so = header.so.unwrap_or(0) as u32;
        let is_last = matches!(header.si, SegmentInfo::Last);
        let segment = RxSegment {
            so,
            is_last,
            payload,
        };
        let entry = self.entry_mut(header.sn);
        let stored = store_segment(&mut entry.segments, segment);
        update_segment_inventory(entry);
        if entry.fully_received {
            entry.full_sdu = Some(reassemble(entry));
            entry.segments.clear();
        }
        stored
    }

    fn refresh_status_report(&mut self) {
        let mut report = AmStatusPdu::new(self.sn_size);
        let mut sn = self.st.rx_next;
        while self.rx_mod_base(sn) < self.rx_mod_base(self.st.rx_highest_status) {
            let complete = self
                .rx_window
                .get(sn)
                .map(|info| info.fully_received)
                .unwrap_or(false);
            if !complete {
                if !self.rx_window.contains(sn) {
                    report.push_nack(StatusNack::whole_sdu(sn));
                } else {
                    let info = self.rx_window.get(sn).unwrap();
                    let mut last_so = 0u32;
                    let mut have_last = false;
                    for seg in &info.segments {
                        if seg.so != last_so {
                            report.push_nack(StatusNack::byte_range(
                                sn,
                                last_so as u16,
                                (seg.so - 1) as u16,
                            ));
                        }
                        if seg.is_last {
                            have_last = true;
                        }
                        last_so = seg.so + seg.payload.len() as u32;
                    }
                    if !have_last {
                        report.push_nack(StatusNack::byte_range(
                            sn,
                            last_so as u16,
                            crate::pdu::SO_END_OF_SDU,
                        ));
                    }
                }
            }
            sn = (sn + 1) % self.modulus;
        }
        report.ack_sn = self.st.rx_highest_status;
        self.metrics.status_reports_generated += 1;
        debug!(ack_sn = report.ack_sn, nacks = report.nacks().len(), "refreshed status report");
        self.status_report = report;
    }

    fn notify_status_report_changed(&mut self) {
        let required = self.do_status && !self.status_prohibit_running;
        if required {
            if let Some(notifier) = self.status_notifier.as_mut() {
                notifier.on_status_report_changed();
            }
        }
    }
}

/// Receiving side of an AM bearer. Cheap to clone: clones share the same underlying state,
/// which is how a handle is handed to the collaborating TX entity as its status provider.
///
/// `executor` sits outside `inner`'s mutex for the same reason `TxAmEntity` keeps its own
/// outside `TxInner`'s: arming a timer must never happen while the caller still holds the lock
/// a `SameThreadExecutor`-run callback would need to re-acquire.
#[derive(Clone)]
pub struct RxAmEntity {
    inner: Arc<Mutex<RxInner>>,
    executor: Arc<dyn Executor>,
}

impl RxAmEntity {
    pub fn new(
        cfg: RxConfig,
        executor: Arc<dyn Executor>,
        upper: Box<dyn UpperLayerDataSink>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let sn_size = cfg.sn_size()?;
        let inner = RxInner {
            sn_size,
            modulus: sn_size.modulus(),
            window_size: sn_size.window_size(),
            t_reassembly_ms: cfg.t_reassembly_ms,
            t_status_prohibit_ms: cfg.t_status_prohibit_ms,
            st: RxState::default(),
            rx_window: SduWindow::new(cfg.max_window),
            status_report: AmStatusPdu::new(sn_size),
            do_status: false,
            status_prohibit_running: false,
            reassembly_running: false,
            reassembly_epoch: 0,
            status_prohibit_epoch: 0,
            metrics: RxMetrics::default(),
            upper,
            status_handler: None,
            status_notifier: None,
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            executor,
        })
    }

    pub fn set_status_handler(&self, handler: Box<dyn TxAmStatusHandler>) {
        self.inner.lock().unwrap().status_handler = Some(handler);
    }

    pub fn set_status_notifier(&self, notifier: Box<dyn TxAmStatusNotifier>) {
        self.inner.lock().unwrap().status_notifier = Some(notifier);
    }

    pub fn metrics(&self) -> RxMetrics {
        self.inner.lock().unwrap().metrics.snapshot()
    }

    pub fn state(&self) -> RxState {
        self.inner.lock().unwrap().st
    }

    #[doc(hidden)]
    pub fn set_state(&self, st: RxState) {
        self.inner.lock().unwrap().st = st;
    }

    pub fn handle_pdu(&self, buf: Bytes) {
        if buf.is_empty() {
            warn!("dropped empty PDU");
            return;
        }
        if (buf[0] >> 7) & 0x01 == 0 {
            self.handle_control_pdu(buf);
        } else {
            self.handle_data_pdu(buf);
        }
    }

    fn handle_control_pdu(&self, buf: Bytes) {
        let mut inner = self.inner.lock().unwrap();
        match AmStatusPdu::unpack(inner.sn_size, &buf) {
            Ok(status) => {
                info!(ack_sn = status.ack_sn, "rx status PDU");
                if let Some(handler) = inner.status_handler.as_mut() {
                    handler.on_status_pdu(status);
                }
            }
            Err(err) => {
                warn!(%err, "failed to unpack control PDU");
            }
        }
    }

    fn handle_data_pdu(&self, buf: Bytes) {
        let sn_size = {
            let inner = self.inner.lock().unwrap();
            inner.sn_size
        };

        let (hdr, consumed) = match header::read(&buf, sn_size) {
            Ok(v) => v,
            Err(err) => {
                let mut inner = self.inner.lock().unwrap();
                inner.metrics.pdus_malformed += 1;
                warn!(%err, "rx PDU with malformed header");
                return;
            }
        };
        let payload = buf.slice(consumed..);

        let mut status_changed = false;
        let mut status_requested = false;
        let mut needs_reassembly_arm = false;

        // A labeled block, not a loop: `break 'process` lets a dropped PDU (window violation,
        // duplicate) skip straight to the polling-bit handling below instead of returning out of
        // the whole function, since §4.5 requires the poll bit to schedule a status report
        // "independent of whether the PDU was dropped for being a duplicate inside the window".
        'process: {
            let mut inner = self.inner.lock().unwrap();

            if hdr.poll {
                debug!("status report requested via polling bit");
                status_requested = true;
            }

            if !inner.inside_rx_window(hdr.sn) {
                inner.metrics.pdus_window_violation += 1;
                debug!(sn = hdr.sn, "discarded PDU outside RX window");
                break 'process;
            }

            let duplicate = inner
                .rx_window
                .get(hdr.sn)
                .map(|info| info.fully_received)
                .unwrap_or(false);
            if duplicate {
                inner.metrics.pdus_duplicate += 1;
                debug!(sn = hdr.sn, "discarded duplicate PDU");
                break 'process;
            }

            status_changed = if matches!(hdr.si, SegmentInfo::Full) {
                inner.handle_full_data_sdu(&hdr, payload);
                true
            } else {
                inner.handle_segment_data_sdu(&hdr, payload)
            };

            if inner.rx_mod_base(hdr.sn) >= inner.rx_mod_base(inner.st.rx_next_highest) {
                inner.st.rx_next_highest = (hdr.sn + 1) % inner.modulus;
            }

            let complete = inner
                .rx_window
                .get(hdr.sn)
                .map(|info| info.fully_received)
                .unwrap_or(false);
            if complete {
                if inner.rx_mod_base(hdr.sn) == inner.rx_mod_base(inner.st.rx_highest_status) {
                    let mut sn_upd = (inner.st.rx_highest_status + 1) % inner.modulus;
                    while inner.rx_mod_base(sn_upd) < inner.rx_mod_base(inner.st.rx_next_highest) {
                        let ok = inner
                            .rx_window
                            .get(sn_upd)
                            .map(|i| i.fully_received)
                            .unwrap_or(false);
                        if !ok {
                            break;
                        }
                        sn_upd = (sn_upd + 1) % inner.modulus;
                    }
                    inner.st.rx_highest_status = sn_upd;
                }

                // Deliver upward strictly in SN order: only when this PDU completed the SDU that
                // RX_NEXT was waiting on do we walk forward, handing each now-complete SDU to the
                // upper layer and retiring it from the window, until the next gap or the highest
                // received SN. An SDU completed out of order (hdr.sn ahead of RX_NEXT) stays
                // buffered — reachable again later through this same loop once the gap fills.
                if inner.rx_mod_base(hdr.sn) == inner.rx_mod_base(inner.st.rx_next) {
                    let mut sn_upd = inner.st.rx_next;
                    while inner.rx_mod_base(sn_upd) < inner.rx_mod_base(inner.st.rx_next_highest) {
                        let sdu = match inner.rx_window.get(sn_upd) {
                            Some(i) if i.fully_received => i.full_sdu.clone().unwrap(),
                            _ => break,
                        };
                        inner.metrics.sdus_delivered += 1;
                        inner.metrics.bytes_delivered += sdu.len() as u64;
                        inner.upper.on_new_sdu(sdu);
                        inner.rx_window.remove(sn_upd);
                        sn_upd = (sn_upd + 1) % inner.modulus;
                    }
                    inner.st.rx_next = sn_upd;
                }
            }

            if inner.reassembly_running {
                let mut stop = false;
                if inner.st.rx_next_status_trigger == inner.st.rx_next {
                    stop = true;
                }
                if inner.rx_mod_base(inner.st.rx_next_status_trigger) == inner.rx_mod_base(inner.st.rx_next + 1) {
                    let has_gap = inner
                        .rx_window
                        .get(inner.st.rx_next)
                        .map(|i| i.has_gap)
                        .unwrap_or(false);
                    if !has_gap {
                        stop = true;
                    }
                }
                if !inner.inside_rx_window(inner.st.rx_next_status_trigger) {
                    stop = true;
                }
                if stop {
                    inner.reassembly_running = false;
                    inner.reassembly_epoch += 1;
                    debug!("stopped t-Reassembly");
                }
            }

            if !inner.reassembly_running {
                let mut restart = false;
                if inner.rx_mod_base(inner.st.rx_next_highest) > inner.rx_mod_base(inner.st.rx_next + 1) {
                    restart = true;
                }
                if inner.rx_mod_base(inner.st.rx_next_highest) == inner.rx_mod_base(inner.st.rx_next + 1) {
                    let has_gap = inner
                        .rx_window
                        .get(inner.st.rx_next)
                        .map(|i| i.has_gap)
                        .unwrap_or(false);
                    if has_gap {
                        restart = true;
                    }
                }
                if restart {
                    inner.st.rx_next_status_trigger = inner.st.rx_next_highest;
                    debug!(trigger = inner.st.rx_next_status_trigger, "started t-Reassembly");
                    needs_reassembly_arm = true;
                }
            }
        }

        if needs_reassembly_arm {
            self.arm_reassembly_timer();
        }
        if status_changed {
            let mut inner = self.inner.lock().unwrap();
            inner.refresh_status_report();
        }
        if status_requested {
            let mut inner = self.inner.lock().unwrap();
            inner.do_status = true;
        }
        if status_changed || status_requested {
            let mut inner = self.inner.lock().unwrap();
            inner.notify_status_report_changed();
        }
    }

    /// (Re)arms t-Reassembly. Self-contained: a brief lock to read config and bump bookkeeping,
    /// then the post happens with the lock already dropped. Must never be called while the
    /// caller itself still holds `inner`'s lock.
    fn arm_reassembly_timer(&self) {
        let armed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.t_reassembly_ms == 0 {
                None
            } else {
                inner.reassembly_running = true;
                inner.reassembly_epoch += 1;
                Some((inner.t_reassembly_ms, inner.reassembly_epoch))
            }
        };
        let Some((ms, epoch)) = armed else {
            return;
        };
        let weak: Weak<Mutex<RxInner>> = Arc::downgrade(&self.inner);
        let this = self.clone();
        self.executor.post_delayed(
            Duration::from_millis(ms),
            Box::new(move || {
                if weak.upgrade().is_some() {
                    this.on_expired_reassembly_timer(epoch);
                }
            }),
        );
    }

    /// (Re)arms t-StatusProhibit. Same self-contained shape as [`Self::arm_reassembly_timer`].
    fn arm_status_prohibit_timer(&self) {
        let armed = {
            let mut inner = self.inner.lock().unwrap();
            if inner.t_status_prohibit_ms == 0 {
                None
            } else {
                inner.status_prohibit_running = true;
                inner.status_prohibit_epoch += 1;
                Some((inner.t_status_prohibit_ms, inner.status_prohibit_epoch))
            }
        };
        let Some((ms, epoch)) = armed else {
            return;
        };
        let weak: Weak<Mutex<RxInner>> = Arc::downgrade(&self.inner);
        let this = self.clone();
        self.executor.post_delayed(
            Duration::from_millis(ms),
            Box::new(move || {
                if weak.upgrade().is_some() {
                    this.on_expired_status_prohibit_timer(epoch);
                }
            }),
        );
    }

    fn on_expired_reassembly_timer(&self, epoch: u64) {
        let needs_rearm = {
            let mut inner = self.inner.lock().unwrap();
            if inner.reassembly_epoch != epoch || !inner.reassembly_running {
                debug!("t-Reassembly already restarted/stopped, skipping stale expiry");
                return;
            }
            inner.reassembly_running = false;
            debug!("t-Reassembly expired");

            if !inner.valid_ack_sn(inner.st.rx_next_status_trigger) {
                debug!("rx_next_status_trigger outside RX window, skipping outdated event");
                return;
            }

            let mut sn_upd = inner.st.rx_next_status_trigger;
            while inner.rx_mod_base(sn_upd) < inner.rx_mod_base(inner.st.rx_next_highest) {
                let complete = inner
                    .rx_window
                    .get(sn_upd)
                    .map(|i| i.fully_received)
                    .unwrap_or(false);
                if !complete {
                    break;
                }
                sn_upd = (sn_upd + 1) % inner.modulus;
            }
            inner.st.rx_highest_status = sn_upd;

            let mut restart = false;
            if inner.rx_mod_base(inner.st.rx_next_highest) > inner.rx_mod_base(inner.st.rx_highest_status + 1) {
                restart = true;
            }
            if inner.rx_mod_base(inner.st.rx_next_highest) == inner.rx_mod_base(inner.st.rx_highest_status + 1) {
                let has_gap = inner
                    .rx_window
                    .get(inner.st.rx_highest_status)
                    .map(|i| i.has_gap)
                    .unwrap_or(false);
                if has_gap {
                    restart = true;
                }
            }
            if restart {
                inner.st.rx_next_status_trigger = inner.st.rx_next_highest;
                debug!("restarted t-Reassembly");
            }

            inner.refresh_status_report();
            inner.do_status = true;
            inner.notify_status_report_changed();
            restart
        };

        if needs_rearm {
            self.arm_reassembly_timer();
        }
    }

    fn on_expired_status_prohibit_timer(&self, epoch: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status_prohibit_epoch != epoch {
            return;
        }
        inner.status_prohibit_running = false;
        inner.notify_status_report_changed();
    }
}

impl RxAmStatusProvider for RxAmEntity {
    fn status_pdu(&self) -> AmStatusPdu {
        let (status, needs_prohibit) = {
            let mut inner = self.inner.lock().unwrap();
            inner.do_status = false;
            let needs_prohibit = inner.t_status_prohibit_ms > 0;
            (inner.status_report.clone(), needs_prohibit)
        };
        if needs_prohibit {
            self.arm_status_prohibit_timer();
        }
        status
    }

    fn status_pdu_len(&self) -> u32 {
        self.inner.lock().unwrap().status_report.packed_size()
    }

    fn status_report_required(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.do_status && !inner.status_prohibit_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SameThreadExecutor;
    use crate::pdu::header::{self as hdr_mod, SegmentInfo as SI};
    use std::sync::Mutex as StdMutex;

    struct CollectingSink {
        sdus: Arc<StdMutex<Vec<Bytes>>>,
    }
    impl UpperLayerDataSink for CollectingSink {
        fn on_new_sdu(&mut self, sdu: Bytes) {
            self.sdus.lock().unwrap().push(sdu);
        }
    }

    fn make_entity() -> (RxAmEntity, Arc<StdMutex<Vec<Bytes>>>) {
        let sdus = Arc::new(StdMutex::new(Vec::new()));
        let sink = CollectingSink { sdus: sdus.clone() };
        let cfg = RxConfig {
            sn_size_bits: 12,
            t_reassembly_ms: 0,
            t_status_prohibit_ms: 0,
            max_window: 2048,
        };
        let entity = RxAmEntity::new(cfg, Arc::new(SameThreadExecutor), Box::new(sink)).unwrap();
        (entity, sdus)
    }

    fn frame_full(sn: u32, payload: &[u8]) -> Bytes {
        let header = AmHeader {
            dc: true,
            poll: false,
            si: SI::Full,
            sn_size: SnSize::Size12,
            sn,
            so: None,
        };
        let mut buf = vec![0u8; header.packed_size() + payload.len()];
        let n = hdr_mod::write(&mut buf, &header);
        buf[n..].copy_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn in_order_full_sdu_is_delivered_immediately() {
        let (entity, sdus) = make_entity();
        entity.handle_pdu(frame_full(0, b"hello"));
        assert_eq!(sdus.lock().unwrap().as_slice(), &[Bytes::from_static(b"hello")]);
        assert_eq!(entity.state().rx_next, 1);
    }

    #[test]
    fn out_of_order_sdu_is_buffered_until_gap_fills() {
        let (entity, sdus) = make_entity();
        entity.handle_pdu(frame_full(1, b"second"));
        assert!(sdus.lock().unwrap().is_empty());
        assert_eq!(entity.state().rx_next, 0);

        entity.handle_pdu(frame_full(0, b"first"));
        let got = sdus.lock().unwrap();
        assert_eq!(got.as_slice(), &[Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
        assert_eq!(entity.state().rx_next, 2);
    }

    /// A duplicate of an SDU that is fully received but still ahead of `RX_NEXT` (because an
    /// earlier gap hasn't filled yet) is still inside the RX window, so it hits the duplicate
    /// path rather than the window-violation path.
    #[test]
    fn duplicate_of_buffered_out_of_order_sdu_is_dropped() {
        let (entity, sdus) = make_entity();
        entity.handle_pdu(frame_full(1, b"second"));
        entity.handle_pdu(frame_full(1, b"second"));
        assert!(sdus.lock().unwrap().is_empty(), "sn=0 gap still unfilled");
        assert_eq!(entity.metrics().pdus_duplicate, 1);

        entity.handle_pdu(frame_full(0, b"first"));
        let got = sdus.lock().unwrap();
        assert_eq!(got.as_slice(), &[Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
    }

    /// A repeat of an SDU that has already been delivered AND had `RX_NEXT` advance past it is a
    /// window violation (it is now below the sliding window's floor), not a "duplicate" in the
    /// `pdus_duplicate` sense — the two counters are disjoint.
    #[test]
    fn repeat_of_already_advanced_sn_is_a_window_violation() {
        let (entity, sdus) = make_entity();
        entity.handle_pdu(frame_full(0, b"first"));
        assert_eq!(entity.state().rx_next, 1);

        entity.handle_pdu(frame_full(0, b"first"));
        assert_eq!(sdus.lock().unwrap().len(), 1, "the repeat must not be redelivered");
        assert_eq!(entity.metrics().pdus_duplicate, 0);
        assert_eq!(entity.metrics().pdus_window_violation, 1);
    }

    /// §4.5: the poll bit must schedule a status report even on a PDU that gets dropped — here,
    /// for lying outside the RX window (a window violation, the other drop path besides
    /// in-window duplicates).
    #[test]
    fn poll_bit_on_window_violation_pdu_still_schedules_status_report() {
        let (entity, _sdus) = make_entity();
        let header = AmHeader {
            dc: true,
            poll: true,
            si: SI::Full,
            sn_size: SnSize::Size12,
            sn: 0,
            so: None,
        };
        let mut buf = vec![0u8; header.packed_size() + 5];
        let n = hdr_mod::write(&mut buf, &header);
        buf[n..].copy_from_slice(b"first");
        let polled_stale = Bytes::from(buf);

        entity.handle_pdu(frame_full(0, b"first"));
        assert_eq!(entity.state().rx_next, 1);
        assert!(!entity.status_report_required());

        // sn=0 is now below RX_NEXT=1: a window violation, not a duplicate.
        entity.handle_pdu(polled_stale);
        assert_eq!(entity.metrics().pdus_window_violation, 1);
        assert!(
            entity.status_report_required(),
            "poll bit on a dropped PDU must still trigger a status report"
        );
    }

    #[test]
    fn status_report_nacks_missing_sn() {
        let (entity, _sdus) = make_entity();
        entity.handle_pdu(frame_full(1, b"second"));
        let status = entity.status_pdu();
        assert_eq!(status.ack_sn, 0);
    }

    #[test]
    fn segment_reassembly_with_duplicate_byte_range() {
        let (entity, sdus) = make_entity();
        let mk = |si: SI, sn: u32, so: Option<u16>, payload: &[u8]| -> Bytes {
            let header = AmHeader {
                dc: true,
                poll: false,
                si,
                sn_size: SnSize::Size12,
                sn,
                so,
            };
            let mut buf = vec![0u8; header.packed_size() + payload.len()];
            let n = hdr_mod::write(&mut buf, &header);
            buf[n..].copy_from_slice(payload);
            Bytes::from(buf)
        };

        entity.handle_pdu(mk(SI::First, 0, None, b"ABC"));
        // Overlapping retransmission of the same first segment, should be dropped as duplicate bytes.
        entity.handle_pdu(mk(SI::First, 0, None, b"ABC"));
        entity.handle_pdu(mk(SI::Last, 0, Some(3), b"DEF"));

        let got = sdus.lock().unwrap();
        assert_eq!(got.as_slice(), &[Bytes::from_static(b"ABCDEF")]);
    }

    #[test]
    fn reassembly_timer_expiry_triggers_status_without_deadlock() {
        let sdus = Arc::new(StdMutex::new(Vec::new()));
        let sink = CollectingSink { sdus: sdus.clone() };
        let cfg = RxConfig {
            sn_size_bits: 12,
            t_reassembly_ms: 10,
            t_status_prohibit_ms: 10,
            max_window: 2048,
        };
        let entity = RxAmEntity::new(cfg, Arc::new(SameThreadExecutor), Box::new(sink)).unwrap();

        // SN 1 arrives before SN 0: starts t-Reassembly. SameThreadExecutor runs the
        // post_delayed callback (and any re-arm inside it) inline; this must not deadlock.
        entity.handle_pdu(frame_full(1, b"second"));
        assert!(sdus.lock().unwrap().is_empty());

        let status = entity.status_pdu();
        assert_eq!(status.ack_sn, 0);
    }
}
