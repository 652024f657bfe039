use crate::Error::InternalError;
use crate::Result;
use crate::vm::Vm;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::thread::JoinHandle;
use velocity_object::Reference;

/// The process-wide thread table, keyed by host-thread identity.
///
/// The hot path passes thread context explicitly; this table exists for diagnostics and for
/// foreign callbacks that re-enter the VM without a context parameter.
static THREADS: LazyLock<DashMap<std::thread::ThreadId, Arc<Thread>>> = LazyLock::new(DashMap::new);

/// The lifecycle of a VM thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadStatus {
    /// The thread has not started yet.
    NotStarted,
    /// The thread is currently executing.
    Running,
    /// The thread has terminated.
    Terminated,
}

/// A VM thread: the wrapper around a host execution thread that owns a `VmState`.
///
/// Threads are registered in the process-wide table before their body runs, so
/// [`Thread::current`] resolves correctly inside the body from the first instruction. A thread
/// is only joined, never aborted; `exit_code` is set by the dispatch loop or by the explicit
/// halt instruction.
#[derive(Debug)]
pub struct Thread {
    id: u64,
    vm: Weak<Vm>,
    value: Mutex<Reference>,
    status: Mutex<ThreadStatus>,
    exit_code: AtomicI32,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    published_roots: Mutex<Vec<Reference>>,
}

impl Thread {
    pub(crate) fn new(id: u64, vm: Weak<Vm>, value: Reference) -> Self {
        Thread {
            id,
            vm,
            value: Mutex::new(value),
            status: Mutex::new(ThreadStatus::NotStarted),
            exit_code: AtomicI32::new(0),
            join_handle: Mutex::new(None),
            published_roots: Mutex::new(Vec::new()),
        }
    }

    /// The VM-assigned thread id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The VM this thread executes in.
    #[must_use]
    pub fn vm(&self) -> Option<Arc<Vm>> {
        self.vm.upgrade()
    }

    /// The object representation of the thread.
    #[must_use]
    pub fn value(&self) -> Reference {
        *self.value.lock()
    }

    pub(crate) fn set_value(&self, value: Reference) {
        *self.value.lock() = value;
    }

    /// The status of the thread.
    #[must_use]
    pub fn status(&self) -> ThreadStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        *self.status.lock() = status;
    }

    /// Whether the thread is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == ThreadStatus::Running
    }

    /// The exit code of the thread.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    /// Set the exit code of the thread.
    pub fn set_exit_code(&self, exit_code: i32) {
        self.exit_code.store(exit_code, Ordering::Release);
    }

    pub(crate) fn set_join_handle(&self, handle: JoinHandle<()>) {
        *self.join_handle.lock() = Some(handle);
    }

    /// Block the caller until this thread terminates.
    ///
    /// # Errors
    /// Returns an internal error if the host thread panicked.
    pub fn join(&self) -> Result<()> {
        let handle = self.join_handle.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| InternalError(format!("thread {} panicked", self.id)))?;
        }
        Ok(())
    }

    /// Publish a root snapshot for the collector; called when parking at a safepoint.
    pub(crate) fn publish_roots(&self, roots: Vec<Reference>) {
        *self.published_roots.lock() = roots;
    }

    pub(crate) fn published_roots(&self) -> Vec<Reference> {
        self.published_roots.lock().clone()
    }

    pub(crate) fn clear_published_roots(&self) {
        self.published_roots.lock().clear();
    }

    /// Register the calling host thread as the given VM thread.
    pub(crate) fn register_current(thread: Arc<Thread>) {
        THREADS.insert(std::thread::current().id(), thread);
    }

    /// Remove the calling host thread from the thread table.
    pub(crate) fn deregister_current() {
        THREADS.remove(&std::thread::current().id());
    }

    /// The VM thread executing on the calling host thread, if any.
    #[must_use]
    pub fn current() -> Option<Arc<Thread>> {
        THREADS
            .get(&std::thread::current().id())
            .map(|entry| entry.value().clone())
    }
}
