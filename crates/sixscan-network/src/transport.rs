//! Transport capability consumed by the probe engine

use parking_lot::Mutex;
use sixscan_core::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Predicate applied by the receiver before a reply enters the results queue
pub type ReplyFilter<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// A probe sink and reply source driven by the engine.
///
/// `send` runs on the calling thread; `recv_loop` runs on a dedicated
/// receiver thread and must return promptly (within one poll interval) once
/// `done` is observed true.
pub trait Transport {
    type Probe: Send;
    type Reply: Send;

    fn send(&self, probe: &Self::Probe) -> Result<()>;

    fn recv_loop(
        &self,
        done: &AtomicBool,
        filter: &ReplyFilter<Self::Reply>,
        sink: &Mutex<Vec<Self::Reply>>,
    ) -> Result<()>;
}
