// SPDX-License-Identifier: GPL-3.0-only

//! Single-flight detection gate
//!
//! At most one detection runs at a time. Frames that arrive while the gate is
//! held are dropped from the detection path instead of queued, so capture and
//! muxing never wait on inference.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared busy flag; clones refer to the same gate
#[derive(Debug, Clone, Default)]
pub struct DetectionGate {
    busy: Arc<AtomicBool>,
}

impl DetectionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-set the busy flag
    ///
    /// Returns a permit when the gate was free. The permit releases the gate
    /// when dropped, whichever way the guarded work ends.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Clear the busy flag unconditionally
    ///
    /// Only for callers that track the flag by hand after
    /// [`GatePermit::into_raw`].
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the gate
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    busy: Arc<AtomicBool>,
}

impl GatePermit {
    /// Give up automatic release; the caller must call [`DetectionGate::release`]
    pub fn into_raw(self) {
        std::mem::forget(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let gate = DetectionGate::new();
        let permit = gate.try_acquire();
        assert!(permit.is_some());
        assert!(gate.try_acquire().is_none());
        assert!(gate.is_busy());

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_raw_release() {
        let gate = DetectionGate::new();
        if let Some(permit) = gate.try_acquire() {
            permit.into_raw();
        }
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        gate.release();
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_exactly_one_concurrent_winner() {
        const THREADS: usize = 16;
        let gate = DetectionGate::new();
        let barrier = Arc::new(Barrier::new(THREADS));
        let winners = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let gate = gate.clone();
                let barrier = Arc::clone(&barrier);
                let held = Arc::clone(&held);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    barrier.wait();
                    let permit = gate.try_acquire();
                    if permit.is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Keep any permit alive until everyone has tried
                    held.wait();
                    drop(permit);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(gate.try_acquire().is_some());
    }
}
