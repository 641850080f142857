//! RLC Acknowledged Mode (TS 38.322) entity pair: segmentation/reassembly, ARQ via status PDUs,
//! and the t-PollRetransmit/t-Reassembly/t-StatusProhibit timers.
//!
//! [`tx::TxAmEntity`] and [`rx::RxAmEntity`] are independent, each owning its own lock; a bearer
//! wires one of each together through [`interconnect`]'s collaborator traits. Neither entity
//! knows about sockets, TUN devices, or a MAC scheduler — [`executor::Executor`] is the only
//! seam to the surrounding runtime, and `demos/loopback.rs` shows the minimal wiring.

pub mod config;
pub mod error;
pub mod executor;
pub mod interconnect;
pub mod metrics;
pub mod pdu;
pub mod retx_queue;
pub mod rx;
pub mod sn;
pub mod tx;
pub mod window;

pub use config::{RxConfig, TxConfig};
pub use error::ConfigError;
pub use executor::{Executor, SameThreadExecutor, ThreadExecutor};
pub use interconnect::{
    LowerLayerBufferNotifier, RxAmStatusProvider, TxAmStatusHandler, TxAmStatusNotifier,
    UpperLayerControl, UpperLayerDataSink,
};
pub use metrics::{RxMetrics, TxMetrics};
pub use pdu::{AmHeader, AmStatusPdu, HeaderError, SegmentInfo, StatusError, StatusNack};
pub use rx::{RxAmEntity, RxState};
pub use sn::SnSize;
pub use tx::{TxAmEntity, TxState};
