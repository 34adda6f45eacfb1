//! Staged, rollback-safe lifecycles and the caching provider built on them.
//!
//! A [`Chain`] is an ordered list of [`Stage`]s whose product types are threaded
//! at compile time by [`ChainBuilder`]. A [`Lifecycle`] commissions the chain
//! and unwinds exactly the stages that committed when any stage fails. A
//! [`CachingProvider`] runs that commission at most once for any number of
//! concurrent callers and tears it down at most once, either when the caller
//! asks ([`ScopePolicy::Local`]) or at process exit ([`ScopePolicy::Global`]).

pub mod events;
pub mod exit;
pub mod lifecycle;
pub mod provider;
pub mod provision;
pub mod stage;

pub use events::{Event, EventKind, EventSink, NullSink, RecordingSink, TracingSink};
pub use exit::{install_signal_handler, ExitHook, ExitHooks, HookId, ManualExitHooks, ProcessExitHooks};
pub use lifecycle::Lifecycle;
pub use provider::{CachingProvider, ScopePolicy};
pub use provision::Provision;
pub use stage::{stage_fn, Chain, ChainBuilder, FnStage, Stage};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error type stages report. Anything `Error + Send + Sync` converts into it with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Position and name of a stage inside its chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageKey {
    pub index: usize,
    pub name: String,
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} '{}'", self.index, self.name)
    }
}

fn describe_failures(failures: &BTreeMap<StageKey, BoxError>) -> String {
    failures
        .iter()
        .map(|(stage, err)| format!("{stage}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Decommission errors hit while rolling back a failed commission.
#[derive(Debug, Error)]
#[error("unwinding failed for {} stage(s): {}", .failures.len(), describe_failures(.failures))]
pub struct UnwindFailure {
    pub failures: BTreeMap<StageKey, BoxError>,
}

/// A stage failed to commission. Every stage committed before it was decommissioned.
#[derive(Debug, Error)]
#[error("stage {stage} failed to commission: {cause}{}", unwind_suffix(.unwind))]
pub struct CommissionFailure {
    pub stage: StageKey,
    #[source]
    pub cause: BoxError,
    pub unwind: Option<UnwindFailure>,
}

fn unwind_suffix(unwind: &Option<UnwindFailure>) -> String {
    match unwind {
        Some(unwind) => format!(" ({unwind})"),
        None => String::new(),
    }
}

/// Errors collected during a normal teardown sweep. Every stage was attempted.
#[derive(Debug, Error)]
#[error("decommission failed for {} stage(s): {}", .failures.len(), describe_failures(.failures))]
pub struct DecommissionFailure {
    pub failures: BTreeMap<StageKey, BoxError>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Commission(#[from] CommissionFailure),
    #[error(transparent)]
    Decommission(#[from] DecommissionFailure),
    #[error("lifecycle already finished")]
    AlreadyFinished,
    #[error("lifecycle is already commissioned")]
    AlreadyCommissioned,
    #[error("first provision failed: {0}")]
    FirstProvision(#[source] Arc<LifecycleError>),
    #[error("exit hook registration failed: {0}")]
    ExitHook(String),
    #[error("chain did not produce a {expected}{}", unwind_suffix(.unwind))]
    ProductType {
        expected: &'static str,
        unwind: Option<UnwindFailure>,
    },
}

impl LifecycleError {
    /// The commission failure behind this error, looking through `FirstProvision`.
    pub fn commission_failure(&self) -> Option<&CommissionFailure> {
        match self {
            LifecycleError::Commission(failure) => Some(failure),
            LifecycleError::FirstProvision(cause) => cause.commission_failure(),
            _ => None,
        }
    }
}
