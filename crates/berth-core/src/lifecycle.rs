use crate::stage::{Carried, Chain, ErasedStage};
use crate::{
    BoxError, CommissionFailure, DecommissionFailure, LifecycleError, StageKey, UnwindFailure,
};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// One executable instance of a [`Chain`].
///
/// Commission is all-or-nothing: the first failing stage triggers a reverse
/// sweep over every stage that committed before it. Decommission is
/// best-effort and exhaustive: every committed stage is attempted even when
/// earlier ones fail.
pub struct Lifecycle<T> {
    stages: Vec<Box<dyn ErasedStage>>,
    /// Indices of committed stages, in commit order.
    commissioned: Vec<usize>,
    _product: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Lifecycle<T> {
    pub fn new(chain: Chain<T>) -> Self {
        Self {
            stages: chain.stages,
            commissioned: Vec::new(),
            _product: PhantomData,
        }
    }

    pub fn commission(&mut self) -> Result<T, LifecycleError> {
        if !self.commissioned.is_empty() {
            return Err(LifecycleError::AlreadyCommissioned);
        }

        info!("commissioning {} stage(s)", self.stages.len());
        let mut carried: Carried = Box::new(());
        for index in 0..self.stages.len() {
            match self.stages[index].commission(carried) {
                Ok(product) => {
                    debug!("commissioned stage {}", self.key(index));
                    self.commissioned.push(index);
                    carried = product;
                }
                Err(cause) => return Err(self.fail_at(index, cause)),
            }
        }

        match carried.downcast::<T>() {
            Ok(product) => Ok(*product),
            Err(_) => {
                let expected = std::any::type_name::<T>();
                warn!("chain did not produce a {expected}, unwinding");
                Err(LifecycleError::ProductType {
                    expected,
                    unwind: self.unwind(),
                })
            }
        }
    }

    pub fn decommission(&mut self) -> Result<(), LifecycleError> {
        info!("decommissioning {} stage(s)", self.commissioned.len());
        let failures = self.sweep();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DecommissionFailure { failures }.into())
        }
    }

    /// Number of stages currently committed and awaiting decommission.
    pub fn commissioned_len(&self) -> usize {
        self.commissioned.len()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn fail_at(&mut self, index: usize, cause: BoxError) -> LifecycleError {
        let stage = self.key(index);
        warn!("stage {stage} failed to commission: {cause}");

        CommissionFailure {
            stage,
            cause,
            unwind: self.unwind(),
        }
        .into()
    }

    fn unwind(&mut self) -> Option<UnwindFailure> {
        let failures = self.sweep();
        if failures.is_empty() {
            None
        } else {
            warn!("{} stage(s) failed to decommission while unwinding", failures.len());
            Some(UnwindFailure { failures })
        }
    }

    fn sweep(&mut self) -> BTreeMap<StageKey, BoxError> {
        let mut failures = BTreeMap::new();
        while let Some(index) = self.commissioned.pop() {
            match self.stages[index].decommission() {
                Ok(()) => debug!("decommissioned stage {}", self.key(index)),
                Err(e) => {
                    let key = self.key(index);
                    warn!("stage {key} failed to decommission: {e}");
                    failures.insert(key, e);
                }
            }
        }
        failures
    }

    fn key(&self, index: usize) -> StageKey {
        StageKey {
            index,
            name: self.stages[index].name().to_owned(),
        }
    }
}
