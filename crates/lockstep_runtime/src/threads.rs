//! Thread interception layer.
//!
//! These operations stand in for the platform's thread lifecycle
//! primitives inside the controlled program. Creation goes through the
//! recycling pool when enabled; join/detach follow the platform's failure
//! taxonomy; `exit_current` transfers control back to the trampoline so a
//! recycled OS thread survives a premature exit.
//!
//! Every operation serializes on the wrapper execution lock, and the ones
//! that need a consistent view of the whole thread set first wait for
//! in-flight registrations to drain.

use crate::context::Runtime;
use crate::error::{Result, ThreadError};
use crate::registry::{LogicalThread, RetVal, StartRoutine, ThreadId, ThreadState};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a recycled thread to reach zombie.
/// No true OS join exists for a pooled thread, so join has to watch the
/// lifecycle state instead.
const JOIN_POLL: Duration = Duration::from_millis(1);

/// Early-exit signal raised by `exit_current` and caught at the
/// routine-invocation frame in the trampoline. Destructors between the
/// exit point and the trampoline run normally on the way out.
pub(crate) struct EarlyExit {
    retval: RetVal,
}

/// Options for creating a logical thread.
#[derive(Debug)]
pub struct CreateOpts {
    /// Create in the detached state: never joinable, reaped on completion.
    pub detached: bool,
    /// Diagnostic label for logs and thread names.
    pub label: String,
}

impl Default for CreateOpts {
    fn default() -> Self {
        Self {
            detached: false,
            label: "worker".into(),
        }
    }
}

impl CreateOpts {
    /// Set the diagnostic label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Create the thread detached.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }
}

impl Runtime {
    /// Intercepted thread creation.
    ///
    /// Allocates or recycles a logical thread and returns its identity.
    /// Fails only if the OS refuses to spawn a backing thread, in which
    /// case the speculative slot is released and the platform error is
    /// propagated.
    pub fn create_thread<F>(&self, routine: F, opts: CreateOpts) -> Result<ThreadId>
    where
        F: FnOnce() -> RetVal + Send + 'static,
    {
        let _wrap = self.shared.sync.wrapper_lock();
        self.shared.sync.registration_started();
        self.request_backtrack_snapshot();

        let mut routine: StartRoutine = Box::new(routine);

        if self.recycling_enabled() {
            match self
                .shared
                .registry
                .recycle(routine, opts.label.clone(), opts.detached)
            {
                Ok((id, _thread)) => {
                    tracing::debug!(%id, label = %opts.label, "recycled a parked thread");
                    return Ok(id);
                }
                // No parked slot; spawn a fresh OS thread below.
                Err(unconsumed) => routine = unconsumed,
            }
        }

        self.spawn_new(routine, opts)
    }

    fn spawn_new(&self, routine: StartRoutine, opts: CreateOpts) -> Result<ThreadId> {
        let (id, thread) = self
            .shared
            .registry
            .insert_new(routine, opts.label.clone(), opts.detached);

        let runtime = self.clone();
        let trampoline_thread = thread.clone();
        let spawn_result = std::thread::Builder::new()
            .name(opts.label.clone())
            .spawn(move || trampoline(runtime, trampoline_thread));

        match spawn_result {
            Ok(handle) => {
                self.shared.registry.note_os_spawn();
                thread.cell.lock().join_handle = Some(handle);
                tracing::debug!(%id, label = %opts.label, "spawned a new OS thread");
                Ok(id)
            }
            Err(err) => {
                tracing::warn!(%id, error = %err, "OS thread creation failed");
                self.shared.sync.registration_finished();
                self.shared.registry.remove(&thread);
                Err(ThreadError::Spawn(err))
            }
        }
    }

    /// Intercepted thread exit.
    ///
    /// Control transfers back to the trampoline's post-routine cleanup, so
    /// a recycled OS thread is returned to the pool instead of
    /// terminating. Must be called from inside a managed routine.
    pub fn exit_current(&self, retval: RetVal) -> ! {
        tracing::debug!("early thread exit");
        panic::panic_any(EarlyExit { retval });
    }

    /// Intercepted join: block until the target terminates and take its
    /// return value.
    pub fn join_thread(&self, id: ThreadId) -> Result<RetVal> {
        let _wrap = self.shared.sync.wrapper_lock();
        self.shared.sync.wait_until_registered();

        let thread = self.joinable(id)?;
        tracing::debug!(%id, "joining thread");

        if self.recycling_enabled() {
            // No true OS join is possible on a pooled thread; watch the
            // lifecycle state instead.
            // TODO: wait on the thread's condvar instead of polling, now
            // that the zombie transition signals it.
            while !matches!(thread.state(), ThreadState::Zombie | ThreadState::Quit) {
                std::thread::sleep(JOIN_POLL);
            }
        } else {
            let handle = thread.cell.lock().join_handle.take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }

        Ok(self.take_retval_and_reap(&thread))
    }

    /// Intercepted non-blocking join.
    pub fn try_join_thread(&self, id: ThreadId) -> Result<RetVal> {
        let _wrap = self.shared.sync.wrapper_lock();
        self.shared.sync.wait_until_registered();

        let thread = self.joinable(id)?;
        if !self.thread_finished(&thread) {
            return Err(ThreadError::WouldBlock);
        }
        Ok(self.take_retval_and_reap(&thread))
    }

    /// Intercepted bounded join.
    ///
    /// On timeout the thread is untouched and remains joinable.
    pub fn timed_join_thread(&self, id: ThreadId, timeout: Duration) -> Result<RetVal> {
        let _wrap = self.shared.sync.wrapper_lock();
        self.shared.sync.wait_until_registered();

        let thread = self.joinable(id)?;
        let deadline = Instant::now() + timeout;
        while !self.thread_finished(&thread) {
            if Instant::now() >= deadline {
                tracing::debug!(%id, ?timeout, "timed join expired");
                return Err(ThreadError::TimedOut);
            }
            std::thread::sleep(JOIN_POLL);
        }
        Ok(self.take_retval_and_reap(&thread))
    }

    /// Intercepted detach.
    pub fn detach_thread(&self, id: ThreadId) -> Result<()> {
        let _wrap = self.shared.sync.wrapper_lock();
        self.shared.sync.wait_until_registered();

        let thread = self
            .shared
            .registry
            .lookup(id)
            .ok_or(ThreadError::NotFound)?;

        let mut cell = thread.cell.lock();
        if cell.detached {
            return Err(ThreadError::AlreadyDetached);
        }
        cell.detached = true;
        let finished = cell.state == ThreadState::Zombie;
        if !self.recycling_enabled() {
            // Dropping the handle is the OS-level detach.
            cell.join_handle = None;
        }
        drop(cell);
        tracing::debug!(%id, finished, "detached thread");

        if finished {
            self.reap(&thread);
        }
        Ok(())
    }

    /// Record the cancelability of the current logical thread, returning
    /// the previous value. Honored at explicit test points only.
    pub fn set_cancel_enabled(&self, enabled: bool) -> bool {
        match self.shared.registry.current() {
            Some(thread) => {
                let mut cell = thread.cell.lock();
                std::mem::replace(&mut cell.cancel_enabled, enabled)
            }
            None => true,
        }
    }

    /// Record the cancellation type (deferred vs. immediate) of the
    /// current logical thread, returning the previous value.
    pub fn set_cancel_deferred(&self, deferred: bool) -> bool {
        match self.shared.registry.current() {
            Some(thread) => {
                let mut cell = thread.cell.lock();
                std::mem::replace(&mut cell.cancel_deferred, deferred)
            }
            None => true,
        }
    }

    /// Request cancellation of a logical thread.
    pub fn cancel_thread(&self, id: ThreadId) -> Result<()> {
        let thread = self
            .shared
            .registry
            .lookup(id)
            .ok_or(ThreadError::NotFound)?;
        thread.cell.lock().cancel_pending = true;
        Ok(())
    }

    /// Cancellation test point: exits the current routine if a cancel is
    /// pending and cancelability is enabled.
    pub fn test_cancel(&self) {
        if let Some(thread) = self.shared.registry.current() {
            let cancel = {
                let cell = thread.cell.lock();
                cell.cancel_pending && cell.cancel_enabled
            };
            if cancel {
                self.exit_current(Box::new(()));
            }
        }
    }

    /// Ask every pooled OS thread to leave its control loop at tear-down.
    pub fn terminate_threads(&self) {
        self.shared.registry.terminate_pool();
    }

    fn joinable(&self, id: ThreadId) -> Result<Arc<LogicalThread>> {
        let thread = self
            .shared
            .registry
            .lookup(id)
            .ok_or(ThreadError::NotFound)?;
        if thread.is_detached() {
            return Err(ThreadError::AlreadyDetached);
        }
        Ok(thread)
    }

    fn thread_finished(&self, thread: &Arc<LogicalThread>) -> bool {
        if self.recycling_enabled() {
            matches!(thread.state(), ThreadState::Zombie | ThreadState::Quit)
        } else {
            let cell = thread.cell.lock();
            cell.join_handle
                .as_ref()
                .map_or(true, |handle| handle.is_finished())
        }
    }

    fn take_retval_and_reap(&self, thread: &Arc<LogicalThread>) -> RetVal {
        if !self.recycling_enabled() {
            let handle = thread.cell.lock().join_handle.take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
        let retval = thread
            .cell
            .lock()
            .retval
            .take()
            .unwrap_or_else(|| Box::new(()));
        self.reap(thread);
        retval
    }

    fn reap(&self, thread: &Arc<LogicalThread>) {
        if self.recycling_enabled() {
            self.shared.registry.reap_into_pool(thread);
        } else {
            self.shared.registry.remove(thread);
        }
    }
}

/// Outcome of one routine invocation.
enum RoutineOutcome {
    Returned(RetVal),
    EarlyExit(RetVal),
    Panicked,
}

fn invoke_routine(routine: StartRoutine) -> RoutineOutcome {
    match panic::catch_unwind(AssertUnwindSafe(routine)) {
        Ok(retval) => RoutineOutcome::Returned(retval),
        Err(payload) => match payload.downcast::<EarlyExit>() {
            Ok(early) => RoutineOutcome::EarlyExit(early.retval),
            Err(payload) => {
                let what = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".into());
                tracing::error!(panic = %what, "thread routine panicked");
                RoutineOutcome::Panicked
            }
        },
    }
}

/// Entry point of every OS thread backing a logical thread.
///
/// The loop outlives individual routines: after one completes, the thread
/// erases its thread-local state, publishes the zombie transition, and
/// parks for reassignment while recycling is on. Only the quit flag or a
/// disabled recycling setting lets the OS thread truly terminate.
pub(crate) fn trampoline(runtime: Runtime, thread: Arc<LogicalThread>) {
    runtime.shared.registry.register_current(&thread);

    let mut cell = thread.cell.lock();
    loop {
        // First dispatch of a freshly spawned thread.
        if cell.state == ThreadState::Uninitialized && cell.routine.is_some() {
            cell.state = ThreadState::Running;
        }

        match cell.state {
            ThreadState::Running => {
                let routine = cell.routine.take();
                let label = cell.routine_label.clone();
                let id = cell.id;
                drop(cell);

                runtime.shared.sync.registration_finished();
                tracing::debug!(%id, %label, "beginning of thread routine");

                let outcome = match routine {
                    Some(routine) => invoke_routine(routine),
                    None => RoutineOutcome::Panicked,
                };
                let retval = match outcome {
                    RoutineOutcome::Returned(v) | RoutineOutcome::EarlyExit(v) => v,
                    RoutineOutcome::Panicked => Box::new(()),
                };

                tracing::debug!(%id, %label, "end of thread routine");

                // A reassigned routine must start from a clean slate.
                runtime.shared.tls_reset.reset_current_thread();
                runtime.request_backtrack_snapshot();

                cell = thread.cell.lock();
                cell.retval = Some(retval);
                cell.state = ThreadState::Zombie;
                let detached = cell.detached;
                drop(cell);
                thread.cv.notify_all();

                if detached {
                    runtime.reap(&thread);
                }

                cell = thread.cell.lock();
            }
            ThreadState::Quit => break,
            _ => {
                if cell.quit || !runtime.recycling_enabled() {
                    break;
                }
                thread.cv.wait(&mut cell);
            }
        }
    }
    cell.state = ThreadState::Quit;
    drop(cell);

    runtime.shared.registry.unbind_current(&thread);
    tracing::debug!("OS thread leaving its control loop");
}
