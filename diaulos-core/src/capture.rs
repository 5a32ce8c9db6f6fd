//! Receive-capture handoff between interrupt context and the poll loop

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

/// Single-producer, single-consumer capture notification
///
/// The receive-complete interrupt publishes the captured run length with
/// [`complete`](CaptureSignal::complete); the poll context collects it with
/// [`take`](CaptureSignal::take). These two cells are the only state shared
/// across contexts: the interrupt never touches the registry or the
/// dispatcher, and each port carries its own signal instead of registering
/// itself anywhere global.
///
/// Load/store atomics only, so this works on cores without compare-and-swap.
pub struct CaptureSignal {
    ready: AtomicBool,
    len: AtomicU16,
}

impl CaptureSignal {
    /// Create a signal with no capture pending
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            len: AtomicU16::new(0),
        }
    }

    /// Publish a completed capture of `len` bytes
    ///
    /// The length is stored before the ready flag is raised.
    pub fn complete(&self, len: u16) {
        self.len.store(len, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Collect the pending capture length, clearing the flag
    ///
    /// Returns None when no capture completed since the last take.
    pub fn take(&self) -> Option<u16> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let len = self.len.load(Ordering::Acquire);
        self.ready.store(false, Ordering::Release);
        Some(len)
    }

    /// Returns true if a capture is waiting to be collected
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Default for CaptureSignal {
    fn default() -> Self {
        Self::new()
    }
}
