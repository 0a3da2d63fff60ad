//! Runtime context.
//!
//! One `Runtime` exists per controlled process. It owns the deterministic
//! timer, the logical thread registry, the lifecycle synchronization, and
//! the replicated configuration; everything else borrows through it. The
//! handle is cheap to clone and shared with every trampoline thread.

use crate::registry::Registry;
use crate::sync::ThreadSync;
use crate::traits::{NoopTlsReset, TlsReset};
use lockstep_core::{DeterministicTimer, ProgramInfo, SharedConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct RuntimeShared {
    pub timer: DeterministicTimer,
    pub registry: Registry,
    pub sync: ThreadSync,
    pub config: RwLock<SharedConfig>,
    pub tls_reset: Arc<dyn TlsReset>,
    alerts: Mutex<VecDeque<String>>,
    program_info: Mutex<Option<ProgramInfo>>,
    backtrack_requested: AtomicBool,
}

/// Handle to the per-process runtime state.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Create a runtime with the given initial configuration and no
    /// platform TLS reset (fine for programs that keep no thread-locals,
    /// and for tests).
    pub fn new(config: SharedConfig) -> Self {
        Self::with_tls_reset(config, Arc::new(NoopTlsReset))
    }

    /// Create a runtime with a platform-supplied TLS reset capability.
    pub fn with_tls_reset(config: SharedConfig, tls_reset: Arc<dyn TlsReset>) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                timer: DeterministicTimer::new(),
                registry: Registry::new(),
                sync: ThreadSync::new(),
                config: RwLock::new(config),
                tls_reset,
                alerts: Mutex::new(VecDeque::new()),
                program_info: Mutex::new(None),
                backtrack_requested: AtomicBool::new(false),
            }),
        }
    }

    /// The virtual time authority.
    pub fn timer(&self) -> &DeterministicTimer {
        &self.shared.timer
    }

    /// The logical thread registry.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// The lifecycle synchronization primitives.
    pub fn sync(&self) -> &ThreadSync {
        &self.shared.sync
    }

    /// A copy of the current shared configuration.
    pub fn config_snapshot(&self) -> SharedConfig {
        self.shared.config.read().clone()
    }

    /// Overwrite the configuration verbatim with what the controller sent.
    pub fn overwrite_config(&self, config: SharedConfig) {
        *self.shared.config.write() = config;
    }

    pub(crate) fn recycling_enabled(&self) -> bool {
        self.shared.config.read().recycle_threads
    }

    pub(crate) fn set_av_dumping(&self, dumping: bool) {
        self.shared.config.write().av_dumping = dumping;
    }

    /// Queue an alert string for the controller; delivered at the next
    /// frame boundary.
    pub fn push_alert(&self, alert: impl Into<String>) {
        self.shared.alerts.lock().push_back(alert.into());
    }

    pub(crate) fn drain_alerts(&self) -> Vec<String> {
        self.shared.alerts.lock().drain(..).collect()
    }

    /// Record program metadata; sent to the controller exactly once.
    pub fn set_program_info(&self, info: ProgramInfo) {
        *self.shared.program_info.lock() = Some(info);
    }

    pub(crate) fn take_program_info(&self) -> Option<ProgramInfo> {
        self.shared.program_info.lock().take()
    }

    /// Ask for a rewind-safety snapshot at the next frame boundary.
    ///
    /// Thread lifecycle events call this so a later rewind never has to
    /// cross a thread creation.
    pub fn request_backtrack_snapshot(&self) {
        self.shared.backtrack_requested.store(true, Ordering::Release);
    }

    pub(crate) fn take_backtrack_request(&self) -> bool {
        self.shared.backtrack_requested.swap(false, Ordering::AcqRel)
    }
}
