//! Logical thread registry.
//!
//! A *logical thread* is the program-visible notion of a thread; which OS
//! thread happens to execute it is an implementation detail that changes
//! when threads are recycled. The registry owns every logical thread slot,
//! the identity maps, and the recycling pool.
//!
//! Recycling exists for the checkpoint engine's benefit: reusing an OS
//! thread across logical-thread lifetimes keeps stacks and TLS blocks at
//! stable addresses, so a restored memory snapshot still matches the live
//! thread layout.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

new_key_type! {
    /// Key of a registry slot. Stable across recycling of the slot.
    pub struct SlotKey;
}

/// Identity of a logical thread, handed back to the program from `create`.
///
/// Fresh per logical thread: a recycled slot gets a new `ThreadId`, and the
/// retired identity stops resolving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lt{}", self.0)
    }
}

/// Lifecycle state of a logical thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Allocated; the backing OS thread has not registered yet.
    Uninitialized,
    /// The backing OS thread is executing the assigned routine.
    Running,
    /// The backing OS thread is alive and idle, awaiting a new routine.
    Parked,
    /// The routine returned but the thread has not been joined/detached.
    Zombie,
    /// Terminal; the OS thread has left (or is leaving) its control loop.
    Quit,
}

/// Value returned by a finished routine.
pub type RetVal = Box<dyn Any + Send + 'static>;

/// A routine assigned to a logical thread.
pub type StartRoutine = Box<dyn FnOnce() -> RetVal + Send + 'static>;

/// Mutable portion of a logical thread, guarded by its own mutex.
pub(crate) struct ThreadCell {
    pub id: ThreadId,
    pub state: ThreadState,
    pub routine: Option<StartRoutine>,
    /// Human-readable routine name, for diagnostics only.
    pub routine_label: String,
    pub detached: bool,
    pub retval: Option<RetVal>,
    pub os_thread: Option<std::thread::ThreadId>,
    pub join_handle: Option<JoinHandle<()>>,
    /// Tear-down flag; a parked thread that observes it leaves its loop.
    pub quit: bool,
    /// Cancellation bookkeeping (recorded, honored at test points).
    pub cancel_enabled: bool,
    pub cancel_deferred: bool,
    pub cancel_pending: bool,
}

/// One conceptual thread of the controlled program.
///
/// Invariant: at most one OS thread executes this logical thread's routine
/// at a time; the registry's wrapper-lock discipline enforces it.
pub struct LogicalThread {
    pub(crate) key: SlotKey,
    pub(crate) cell: Mutex<ThreadCell>,
    /// Signaled on reassignment, on the zombie transition, and at
    /// tear-down.
    pub(crate) cv: Condvar,
}

impl LogicalThread {
    fn new(
        key: SlotKey,
        id: ThreadId,
        routine: StartRoutine,
        label: String,
        detached: bool,
    ) -> Self {
        Self {
            key,
            cell: Mutex::new(ThreadCell {
                id,
                state: ThreadState::Uninitialized,
                routine: Some(routine),
                routine_label: label,
                detached,
                retval: None,
                os_thread: None,
                join_handle: None,
                quit: false,
                cancel_enabled: true,
                cancel_deferred: true,
                cancel_pending: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Current identity. Changes when the slot is recycled.
    pub fn id(&self) -> ThreadId {
        self.cell.lock().id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ThreadState {
        self.cell.lock().state
    }

    /// Whether the logical thread is detached.
    pub fn is_detached(&self) -> bool {
        self.cell.lock().detached
    }
}

#[derive(Default)]
struct RegistryInner {
    slots: SlotMap<SlotKey, Arc<LogicalThread>>,
    by_id: FxHashMap<ThreadId, SlotKey>,
    by_os: FxHashMap<std::thread::ThreadId, SlotKey>,
    next_id: u64,
    spawned_os_threads: u64,
    main_thread: Option<std::thread::ThreadId>,
}

/// Owner of every logical thread slot and the identity maps.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a brand-new slot for a logical thread.
    ///
    /// Never fails; the slot map grows as needed. The caller spawns the
    /// backing OS thread and releases the slot if that spawn fails.
    pub fn insert_new(
        &self,
        routine: StartRoutine,
        label: String,
        detached: bool,
    ) -> (ThreadId, Arc<LogicalThread>) {
        let mut inner = self.inner.lock();
        let id = ThreadId(inner.next_id);
        inner.next_id += 1;
        let key = inner
            .slots
            .insert_with_key(|key| Arc::new(LogicalThread::new(key, id, routine, label, detached)));
        inner.by_id.insert(id, key);
        let thread = inner.slots[key].clone();
        (id, thread)
    }

    /// Hand a parked slot a new routine and identity, waking its OS thread.
    ///
    /// When no parked slot is available the routine is handed back and the
    /// caller falls back to spawning a fresh OS thread. Preferring parked
    /// slots bounds OS thread creation and keeps snapshot memory layout
    /// stable.
    pub fn recycle(
        &self,
        routine: StartRoutine,
        label: String,
        detached: bool,
    ) -> std::result::Result<(ThreadId, Arc<LogicalThread>), StartRoutine> {
        let mut inner = self.inner.lock();

        let candidate = inner.slots.iter().find_map(|(key, thread)| {
            let cell = thread.cell.lock();
            (cell.state == ThreadState::Parked && !cell.quit).then(|| (key, thread.clone()))
        });
        let Some((key, thread)) = candidate else {
            return Err(routine);
        };

        let id = ThreadId(inner.next_id);
        inner.next_id += 1;
        inner.by_id.insert(id, key);

        let mut cell = thread.cell.lock();
        cell.id = id;
        cell.routine = Some(routine);
        cell.routine_label = label;
        cell.detached = detached;
        cell.retval = None;
        cell.cancel_enabled = true;
        cell.cancel_deferred = true;
        cell.cancel_pending = false;
        cell.state = ThreadState::Running;
        drop(cell);
        drop(inner);

        thread.cv.notify_all();
        Ok((id, thread))
    }

    /// Record that a fresh OS thread was spawned for a slot.
    pub fn note_os_spawn(&self) {
        self.inner.lock().spawned_os_threads += 1;
    }

    /// Install the calling OS thread as the backing thread of `thread`.
    pub fn register_current(&self, thread: &Arc<LogicalThread>) {
        let os_id = std::thread::current().id();
        self.inner.lock().by_os.insert(os_id, thread.key);
        thread.cell.lock().os_thread = Some(os_id);
    }

    /// Dissociate the calling OS thread on its way out of the trampoline.
    pub fn unbind_current(&self, thread: &Arc<LogicalThread>) {
        let os_id = std::thread::current().id();
        self.inner.lock().by_os.remove(&os_id);
        let mut cell = thread.cell.lock();
        if cell.os_thread == Some(os_id) {
            cell.os_thread = None;
        }
    }

    /// Resolve a logical thread by identity.
    ///
    /// Fails for identities that were never issued and for identities
    /// retired by a join/detach.
    pub fn lookup(&self, id: ThreadId) -> Option<Arc<LogicalThread>> {
        let inner = self.inner.lock();
        let key = *inner.by_id.get(&id)?;
        let thread = inner.slots.get(key)?.clone();
        drop(inner);
        // The map can briefly hold a retired identity while its slot is
        // being recycled; the cell's identity is authoritative.
        (thread.id() == id).then_some(thread)
    }

    /// The logical thread backed by the calling OS thread, if any.
    pub fn current(&self) -> Option<Arc<LogicalThread>> {
        let inner = self.inner.lock();
        let key = *inner.by_os.get(&std::thread::current().id())?;
        inner.slots.get(key).cloned()
    }

    /// Retire a logical thread's identity and park its OS thread for reuse.
    pub fn reap_into_pool(&self, thread: &Arc<LogicalThread>) {
        let mut inner = self.inner.lock();
        let mut cell = thread.cell.lock();
        inner.by_id.remove(&cell.id);
        cell.state = ThreadState::Parked;
        drop(cell);
        drop(inner);
        thread.cv.notify_all();
    }

    /// Remove a logical thread entirely (recycling disabled, or creation
    /// failed before the OS thread existed).
    pub fn remove(&self, thread: &Arc<LogicalThread>) {
        let mut inner = self.inner.lock();
        let cell = thread.cell.lock();
        inner.by_id.remove(&cell.id);
        if let Some(os_id) = cell.os_thread {
            inner.by_os.remove(&os_id);
        }
        drop(cell);
        inner.slots.remove(thread.key);
    }

    /// Mark the calling OS thread as the program's main thread.
    ///
    /// Idempotent; the frame boundary calls it every frame.
    pub fn set_main_thread(&self) {
        let mut inner = self.inner.lock();
        if inner.main_thread.is_none() {
            inner.main_thread = Some(std::thread::current().id());
        }
    }

    /// Whether the calling OS thread is the program's main thread.
    pub fn is_main_thread(&self) -> bool {
        self.inner.lock().main_thread == Some(std::thread::current().id())
    }

    /// Ask every pooled OS thread to leave its control loop.
    pub fn terminate_pool(&self) {
        let threads: Vec<Arc<LogicalThread>> = {
            let inner = self.inner.lock();
            inner.slots.values().cloned().collect()
        };
        for thread in threads {
            thread.cell.lock().quit = true;
            thread.cv.notify_all();
        }
    }

    /// Number of live logical-thread identities (created but not yet
    /// joined or detached-and-finished).
    pub fn occupied(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    /// Number of slots, including parked recycling candidates.
    pub fn pool_size(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Total OS threads ever spawned on behalf of the registry.
    pub fn spawned_os_threads(&self) -> u64 {
        self.inner.lock().spawned_os_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_routine() -> StartRoutine {
        Box::new(|| Box::new(()) as RetVal)
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = Registry::new();
        let (id, thread) = registry.insert_new(noop_routine(), "worker".into(), false);

        assert_eq!(thread.state(), ThreadState::Uninitialized);
        assert_eq!(registry.occupied(), 1);
        assert!(registry.lookup(id).is_some());
        assert!(registry.lookup(ThreadId(999)).is_none());
    }

    #[test]
    fn test_identities_are_never_reissued() {
        let registry = Registry::new();
        let (first, thread) = registry.insert_new(noop_routine(), "a".into(), false);
        registry.remove(&thread);
        let (second, _) = registry.insert_new(noop_routine(), "b".into(), false);

        assert_ne!(first, second);
        assert!(registry.lookup(first).is_none());
    }

    #[test]
    fn test_recycle_prefers_parked_slot() {
        let registry = Registry::new();
        let (old_id, thread) = registry.insert_new(noop_routine(), "a".into(), false);

        // No parked slot yet: the thread is uninitialized.
        assert!(registry
            .recycle(noop_routine(), "b".into(), false)
            .is_err());

        registry.reap_into_pool(&thread);
        assert_eq!(registry.occupied(), 0);
        assert_eq!(registry.pool_size(), 1);

        let Ok((new_id, recycled)) = registry.recycle(noop_routine(), "b".into(), false) else {
            panic!("parked slot available");
        };
        assert_eq!(recycled.key, thread.key);
        assert_ne!(new_id, old_id);
        assert_eq!(recycled.state(), ThreadState::Running);

        // The retired identity no longer resolves; the new one does.
        assert!(registry.lookup(old_id).is_none());
        assert!(registry.lookup(new_id).is_some());
    }

    #[test]
    fn test_recycle_skips_quitting_slot() {
        let registry = Registry::new();
        let (_, thread) = registry.insert_new(noop_routine(), "a".into(), false);
        registry.reap_into_pool(&thread);
        registry.terminate_pool();

        assert!(registry
            .recycle(noop_routine(), "b".into(), false)
            .is_err());
    }

    #[test]
    fn test_main_thread_marker() {
        let registry = Registry::new();
        assert!(!registry.is_main_thread());
        registry.set_main_thread();
        assert!(registry.is_main_thread());

        let registry = std::sync::Arc::new(registry);
        let other = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.is_main_thread())
        };
        assert!(!other.join().unwrap());
    }
}
