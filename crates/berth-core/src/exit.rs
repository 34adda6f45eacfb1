//! Process-exit hooks.
//!
//! [`ExitHooks`] is the seam the global scope registers its teardown with.
//! [`ProcessExitHooks`] runs hooks when the process exits normally (through a
//! C `atexit` handler) or is interrupted (through [`install_signal_handler`]).
//! [`ManualExitHooks`] runs them only when told to.

use crate::LifecycleError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::{debug, error};

pub type ExitHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(u64);

pub trait ExitHooks: Send + Sync {
    fn register(&self, hook: ExitHook) -> Result<HookId, LifecycleError>;

    /// Drop a pending hook without running it. Returns false when the hook
    /// already ran or was never registered here.
    fn deregister(&self, id: HookId) -> bool;
}

struct HookRegistry {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(HookId, ExitHook)>>,
}

impl HookRegistry {
    const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            hooks: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, hook: ExitHook) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, hook));
        debug!("registered exit hook {id:?}");
        id
    }

    fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        before != hooks.len()
    }

    fn pending(&self) -> usize {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run and forget every pending hook, most recently registered first.
    fn run_all(&self) -> usize {
        let drained: Vec<(HookId, ExitHook)> = {
            let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            hooks.drain(..).collect()
        };
        let count = drained.len();
        for (id, hook) in drained.into_iter().rev() {
            debug!("running exit hook {id:?}");
            if catch_unwind(AssertUnwindSafe(hook)).is_err() {
                error!("exit hook {id:?} panicked");
            }
        }
        count
    }
}

/// Hooks that run only when [`ManualExitHooks::fire`] is called.
pub struct ManualExitHooks {
    registry: HookRegistry,
}

impl Default for ManualExitHooks {
    fn default() -> Self {
        Self {
            registry: HookRegistry::new(),
        }
    }
}

impl ManualExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every pending hook, newest first. Returns how many ran.
    pub fn fire(&self) -> usize {
        self.registry.run_all()
    }

    pub fn pending(&self) -> usize {
        self.registry.pending()
    }
}

impl ExitHooks for ManualExitHooks {
    fn register(&self, hook: ExitHook) -> Result<HookId, LifecycleError> {
        Ok(self.registry.add(hook))
    }

    fn deregister(&self, id: HookId) -> bool {
        self.registry.remove(id)
    }
}

static PROCESS_HOOKS: HookRegistry = HookRegistry::new();
static AT_EXIT_INSTALLED: OnceLock<bool> = OnceLock::new();
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// The process-wide hook registry.
///
/// All instances share one registry. The first registration installs an
/// `atexit` handler, so hooks run when `main` returns or `std::process::exit`
/// is called. They do not run on `abort` or on an unhandled signal unless
/// [`install_signal_handler`] was called.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExitHooks;

impl ExitHooks for ProcessExitHooks {
    fn register(&self, hook: ExitHook) -> Result<HookId, LifecycleError> {
        if !*AT_EXIT_INSTALLED.get_or_init(install_at_exit) {
            return Err(LifecycleError::ExitHook(
                "atexit refused to register the hook runner".to_owned(),
            ));
        }
        Ok(PROCESS_HOOKS.add(hook))
    }

    fn deregister(&self, id: HookId) -> bool {
        PROCESS_HOOKS.remove(id)
    }
}

extern "C" fn run_process_hooks() {
    let ran = PROCESS_HOOKS.run_all();
    if ran > 0 {
        debug!("ran {ran} exit hook(s) at process exit");
    }
}

#[allow(unsafe_code)]
fn install_at_exit() -> bool {
    // SAFETY: `run_process_hooks` is an `extern "C" fn()` taking no arguments,
    // which is exactly what `atexit` expects, and it never unwinds because each
    // hook runs under `catch_unwind`.
    unsafe { libc::atexit(run_process_hooks) == 0 }
}

/// Run pending process hooks on Ctrl-C / SIGTERM, then exit with status 130.
///
/// A second interrupt while hooks are still running exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        eprintln!("\ninterrupted, tearing down...");
        PROCESS_HOOKS.run_all();
        std::process::exit(130);
    });
}
