use crate::LifecycleError;
use std::fmt;
use std::sync::Arc;

/// The recorded outcome of a commission: a value or the failure, never both.
///
/// Clones share the same allocation, so every caller of a caching provider
/// holds the very same value (or the very same failure).
pub struct Provision<T> {
    outcome: Result<Arc<T>, Arc<LifecycleError>>,
}

impl<T> Provision<T> {
    pub fn success(value: T) -> Self {
        Self {
            outcome: Ok(Arc::new(value)),
        }
    }

    pub fn failure(cause: LifecycleError) -> Self {
        Self {
            outcome: Err(Arc::new(cause)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        self.outcome.as_ref().ok()
    }

    pub fn cause(&self) -> Option<&Arc<LifecycleError>> {
        self.outcome.as_ref().err()
    }

    /// The value, or [`LifecycleError::FirstProvision`] wrapping the recorded failure.
    pub fn get(&self) -> Result<Arc<T>, LifecycleError> {
        match &self.outcome {
            Ok(value) => Ok(Arc::clone(value)),
            Err(cause) => Err(LifecycleError::FirstProvision(Arc::clone(cause))),
        }
    }

    /// True when both provisions hold the same value or the same failure.
    pub fn shares_outcome_with(&self, other: &Provision<T>) -> bool {
        match (&self.outcome, &other.outcome) {
            (Ok(a), Ok(b)) => Arc::ptr_eq(a, b),
            (Err(a), Err(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T> Clone for Provision<T> {
    fn clone(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Provision<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(value) => f.debug_tuple("Provision::Success").field(value).finish(),
            Err(cause) => f.debug_tuple("Provision::Failure").field(cause).finish(),
        }
    }
}
