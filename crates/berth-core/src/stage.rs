use crate::lifecycle::Lifecycle;
use crate::BoxError;
use std::any::Any;
use std::marker::PhantomData;

/// One unit of acquisition work.
///
/// `commission` receives the product of the previous stage in the chain (the
/// root stage receives `()`) and returns its own product. `decommission`
/// releases whatever `commission` acquired; it takes no input, so a stage keeps
/// what it needs for teardown from its own commission. A lifecycle only calls
/// `decommission` on stages whose `commission` succeeded.
pub trait Stage: Send + 'static {
    type Requirement: Send + 'static;
    type Product: Send + 'static;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn commission(&mut self, requirement: Self::Requirement) -> Result<Self::Product, BoxError>;

    fn decommission(&mut self) -> Result<(), BoxError>;
}

pub(crate) type Carried = Box<dyn Any + Send>;

/// Object-safe view of a [`Stage`] with its types erased.
pub(crate) trait ErasedStage: Send {
    fn name(&self) -> &str;
    fn commission(&mut self, input: Carried) -> Result<Carried, BoxError>;
    fn decommission(&mut self) -> Result<(), BoxError>;
}

struct Erased<S>(S);

impl<S: Stage> ErasedStage for Erased<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn commission(&mut self, input: Carried) -> Result<Carried, BoxError> {
        let requirement = input.downcast::<S::Requirement>().map_err(|_| {
            BoxError::from(format!(
                "stage '{}' received a requirement of the wrong type",
                self.0.name()
            ))
        })?;
        let product = self.0.commission(*requirement)?;
        Ok(Box::new(product))
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        self.0.decommission()
    }
}

/// Accumulates stages, threading each product type into the next requirement.
///
/// ```
/// use berth_core::{stage_fn, ChainBuilder};
///
/// let chain = ChainBuilder::new()
///     .and_then(stage_fn("port", |(): ()| Ok(8080_u16), || Ok(())))
///     .and_then(stage_fn("url", |port: u16| Ok(format!("http://localhost:{port}")), || Ok(())))
///     .build();
/// assert_eq!(chain.len(), 2);
/// ```
pub struct ChainBuilder<T> {
    stages: Vec<Box<dyn ErasedStage>>,
    _product: PhantomData<fn() -> T>,
}

impl ChainBuilder<()> {
    /// An empty accumulator; the first stage added must take `()`.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            _product: PhantomData,
        }
    }

    /// Start from a root stage.
    pub fn root<S>(stage: S) -> ChainBuilder<S::Product>
    where
        S: Stage<Requirement = ()>,
    {
        Self::new().and_then(stage)
    }
}

impl Default for ChainBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ChainBuilder<T> {
    pub fn and_then<S>(mut self, stage: S) -> ChainBuilder<S::Product>
    where
        S: Stage<Requirement = T>,
    {
        self.stages.push(Box::new(Erased(stage)));
        ChainBuilder {
            stages: self.stages,
            _product: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Freeze the accumulator. The returned chain cannot grow.
    pub fn build(self) -> Chain<T> {
        Chain {
            stages: self.stages,
            _product: PhantomData,
        }
    }
}

/// An immutable, ordered sequence of stages producing a `T`.
pub struct Chain<T> {
    pub(crate) stages: Vec<Box<dyn ErasedStage>>,
    _product: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Chain<T> {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_owned()).collect()
    }

    pub fn into_lifecycle(self) -> Lifecycle<T> {
        Lifecycle::new(self)
    }
}

/// A stage made of two closures.
pub struct FnStage<R, P, C, D> {
    name: String,
    commission: C,
    decommission: D,
    _types: PhantomData<fn(R) -> P>,
}

pub fn stage_fn<R, P, C, D>(name: impl Into<String>, commission: C, decommission: D) -> FnStage<R, P, C, D>
where
    R: Send + 'static,
    P: Send + 'static,
    C: FnMut(R) -> Result<P, BoxError> + Send + 'static,
    D: FnMut() -> Result<(), BoxError> + Send + 'static,
{
    FnStage {
        name: name.into(),
        commission,
        decommission,
        _types: PhantomData,
    }
}

impl<R, P, C, D> Stage for FnStage<R, P, C, D>
where
    R: Send + 'static,
    P: Send + 'static,
    C: FnMut(R) -> Result<P, BoxError> + Send + 'static,
    D: FnMut() -> Result<(), BoxError> + Send + 'static,
{
    type Requirement = R;
    type Product = P;

    fn name(&self) -> &str {
        &self.name
    }

    fn commission(&mut self, requirement: R) -> Result<P, BoxError> {
        (self.commission)(requirement)
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        (self.decommission)()
    }
}
