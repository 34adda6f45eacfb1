//! Compute-once provisioning over a [`Lifecycle`].

use crate::events::{Event, EventKind, EventSink, TracingSink};
use crate::exit::{ExitHooks, HookId, ProcessExitHooks};
use crate::lifecycle::Lifecycle;
use crate::provision::Provision;
use crate::stage::Chain;
use crate::LifecycleError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info};

/// When a provider's teardown actually runs.
#[derive(Clone)]
pub enum ScopePolicy {
    /// `finish()` decommissions immediately and returns any error.
    Local,
    /// The first successful commission registers an exit hook that performs
    /// the decommission; `finish()` only logs a notice.
    Global(Arc<dyn ExitHooks>),
}

impl ScopePolicy {
    /// Global scope bound to the real process exit.
    pub fn global() -> Self {
        ScopePolicy::Global(Arc::new(ProcessExitHooks))
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ScopePolicy::Global(_))
    }
}

impl fmt::Debug for ScopePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopePolicy::Local => f.write_str("Local"),
            ScopePolicy::Global(_) => f.write_str("Global"),
        }
    }
}

/// State the exit hook needs to outlive the provider.
struct Shared<T> {
    lifecycle: Mutex<Lifecycle<T>>,
    finished: AtomicBool,
    events: Arc<dyn EventSink>,
}

impl<T: Send + 'static> Shared<T> {
    fn emit(&self, kind: EventKind, message: Option<String>) {
        self.events.on_event(&Event::new(kind, message));
    }

    fn teardown(&self) -> Result<(), LifecycleError> {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("finish already ran, ignoring");
            return Ok(());
        }

        self.emit(EventKind::FinishStarted, None);
        let result = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decommission();
        self.emit(
            EventKind::FinishCompleted,
            result.as_ref().err().map(ToString::to_string),
        );
        result
    }

    fn teardown_at_exit(&self) {
        if let Err(e) = self.teardown() {
            error!("teardown at process exit failed: {e}");
            self.emit(
                EventKind::Notice,
                Some(format!("teardown at process exit failed: {e}")),
            );
        }
    }
}

/// Runs a lifecycle's commission at most once and its decommission at most once.
///
/// Every caller of [`provide`](Self::provide) gets the same [`Provision`],
/// including the same failure; a failed commission is never retried.
pub struct CachingProvider<T> {
    shared: Arc<Shared<T>>,
    cell: OnceLock<Provision<T>>,
    scope: ScopePolicy,
    hook: Mutex<Option<HookId>>,
}

impl<T: Send + Sync + 'static> CachingProvider<T> {
    pub fn new(lifecycle: Lifecycle<T>, scope: ScopePolicy) -> Self {
        Self::with_events(lifecycle, scope, Arc::new(TracingSink))
    }

    pub fn from_chain(chain: Chain<T>, scope: ScopePolicy) -> Self {
        Self::new(chain.into_lifecycle(), scope)
    }

    pub fn with_events(
        lifecycle: Lifecycle<T>,
        scope: ScopePolicy,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(lifecycle),
                finished: AtomicBool::new(false),
                events,
            }),
            cell: OnceLock::new(),
            scope,
            hook: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> &ScopePolicy {
        &self.scope
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// True while a global-scope exit hook is registered for this provider.
    pub fn has_exit_hook(&self) -> bool {
        self.hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn provide(&self) -> Provision<T> {
        if self.is_finished() {
            return Provision::failure(LifecycleError::AlreadyFinished);
        }

        self.shared.emit(EventKind::ProvideStarted, None);
        let provision = self.cell.get_or_init(|| self.commission()).clone();
        self.shared.emit(EventKind::ProvideCompleted, None);
        provision
    }

    pub fn finish(&self) -> Result<(), LifecycleError> {
        match &self.scope {
            ScopePolicy::Local => self.shared.teardown(),
            ScopePolicy::Global(_) => {
                info!("global scope: teardown deferred to process exit");
                self.shared.emit(
                    EventKind::Notice,
                    Some("finish ignored, teardown deferred to process exit".to_owned()),
                );
                Ok(())
            }
        }
    }

    /// Tear down right away, in either scope, and drop any pending exit hook.
    pub fn finish_now(&self) -> Result<(), LifecycleError> {
        let mut slot = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if let (Some(id), ScopePolicy::Global(hooks)) = (slot.take(), &self.scope) {
            if hooks.deregister(id) {
                debug!("deregistered exit hook {id:?}");
            }
        }
        self.shared.teardown()
    }

    fn commission(&self) -> Provision<T> {
        let outcome = {
            let mut lifecycle = self
                .shared
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.is_finished() {
                return Provision::failure(LifecycleError::AlreadyFinished);
            }
            self.shared.emit(EventKind::CommissionStarted, None);
            lifecycle.commission()
        };

        match outcome {
            Ok(value) => {
                self.shared.emit(EventKind::CommissionSucceeded, None);
                if let ScopePolicy::Global(hooks) = &self.scope {
                    if let Err(e) = self.register_exit_hook(hooks.as_ref()) {
                        error!("{e}; tearing down now");
                        if let Err(teardown) = self.shared.teardown() {
                            error!("teardown after failed hook registration: {teardown}");
                        }
                        return Provision::failure(e);
                    }
                }
                Provision::success(value)
            }
            Err(e) => {
                self.shared
                    .emit(EventKind::CommissionFailed, Some(e.to_string()));
                Provision::failure(e)
            }
        }
    }

    fn register_exit_hook(&self, hooks: &dyn ExitHooks) -> Result<(), LifecycleError> {
        let mut slot = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.is_finished() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let id = hooks.register(Box::new(move || shared.teardown_at_exit()))?;
        *slot = Some(id);
        Ok(())
    }
}

impl<T> fmt::Debug for CachingProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingProvider")
            .field("scope", &self.scope)
            .field("provided", &self.cell.get().is_some())
            .field("finished", &self.shared.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
