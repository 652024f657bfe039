use crate::state::VmState;
use crate::thread::Thread;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

#[derive(Debug, Default)]
struct Counts {
    mutators: usize,
    parked: usize,
}

/// The stop-the-world barrier for garbage collection.
///
/// Suspension is cooperative: mutator threads poll at opcode boundaries. When a collection is
/// requested, each polling thread publishes a snapshot of its roots and parks; the collecting
/// thread waits for every other mutator to park, runs the collector on its own thread, and
/// releases the barrier. No mutator is ever mid-stack-operation while parked.
#[derive(Debug, Default)]
pub struct Safepoint {
    stop: AtomicBool,
    counts: Mutex<Counts>,
    condvar: Condvar,
}

impl Safepoint {
    /// Create a new safepoint barrier.
    #[must_use]
    pub fn new() -> Self {
        Safepoint::default()
    }

    /// Register the calling thread as a mutator.
    pub fn register_mutator(&self) {
        self.counts.lock().mutators += 1;
    }

    /// Deregister the calling thread; a thread that exits while a stop is pending counts as
    /// parked, so the collector is notified.
    pub fn deregister_mutator(&self) {
        let mut counts = self.counts.lock();
        counts.mutators = counts.mutators.saturating_sub(1);
        self.condvar.notify_all();
    }

    /// The number of registered mutators.
    #[must_use]
    pub fn mutators(&self) -> usize {
        self.counts.lock().mutators
    }

    /// Poll the barrier at an opcode boundary. When a stop is pending, publish the thread's
    /// roots and park until the collector releases the barrier.
    pub fn poll(&self, thread: &Thread, state: &VmState) {
        if !self.stop.load(Ordering::Acquire) {
            return;
        }
        thread.publish_roots(state.roots());
        trace!("thread {} parked at safepoint", thread.id());
        let mut counts = self.counts.lock();
        counts.parked += 1;
        self.condvar.notify_all();
        while self.stop.load(Ordering::Acquire) {
            self.condvar.wait(&mut counts);
        }
        counts.parked -= 1;
    }

    /// Request a stop and wait until every other mutator has parked. `collector_is_mutator`
    /// excludes the calling thread from the rendezvous count.
    pub fn begin(&self, collector_is_mutator: bool) {
        self.stop.store(true, Ordering::Release);
        let expected_parked = usize::from(collector_is_mutator);
        let mut counts = self.counts.lock();
        while counts.parked + expected_parked < counts.mutators {
            self.condvar.wait(&mut counts);
        }
    }

    /// Release the barrier and wake every parked mutator.
    pub fn end(&self) {
        self.stop.store(false, Ordering::Release);
        let _counts = self.counts.lock();
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        let safepoint = Safepoint::new();
        assert_eq!(0, safepoint.mutators());
        safepoint.register_mutator();
        safepoint.register_mutator();
        assert_eq!(2, safepoint.mutators());
        safepoint.deregister_mutator();
        assert_eq!(1, safepoint.mutators());
    }

    #[test]
    fn test_begin_end_with_single_mutator() {
        let safepoint = Safepoint::new();
        safepoint.register_mutator();
        // The collecting thread is the only mutator, so the rendezvous is immediate.
        safepoint.begin(true);
        safepoint.end();
        safepoint.deregister_mutator();
    }

    #[test]
    fn test_begin_waits_for_exiting_mutator() {
        let safepoint = std::sync::Arc::new(Safepoint::new());
        safepoint.register_mutator();
        safepoint.register_mutator();

        let other = safepoint.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            other.deregister_mutator();
        });

        // Blocks until the second mutator exits.
        safepoint.begin(true);
        safepoint.end();
        handle.join().expect("join");
    }
}
