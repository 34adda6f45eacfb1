use crate::container::{CreateContainer, CreatedContainer, RunningContainer, StartContainer};
use crate::stages::{AwaitLogLine, CopyFromContainer, CopyIntoContainer, ExecInContainer};
use crate::transport::ContainerTransport;
use crate::ContainerError;
use berth_core::{Chain, ChainBuilder, Stage};
use berth_schema::{ContainerParams, PostStartAction, PreStartAction, ResolvedManifest};
use std::sync::Arc;
use std::time::Duration;

/// Builds the chain for one container, before it starts.
///
/// ```
/// use berth_runtime::{ContainerPlan, CopyIntoContainer, ExecInContainer, MockTransport};
/// use berth_schema::{ContainerParams, ImageRef};
/// use std::sync::Arc;
///
/// let params = ContainerParams::builder(ImageRef::parse("redis:7").unwrap()).build();
/// let chain = ContainerPlan::new(params, Arc::new(MockTransport::new()))
///     .pre_start(CopyIntoContainer::new("redis.conf", "/etc/redis.conf"))
///     .start()
///     .post_start(ExecInContainer::new(["redis-cli", "ping"]))
///     .build();
/// assert_eq!(chain.len(), 4);
/// ```
pub struct ContainerPlan {
    chain: ChainBuilder<CreatedContainer>,
}

impl ContainerPlan {
    pub fn new(params: ContainerParams, transport: Arc<dyn ContainerTransport>) -> Self {
        Self {
            chain: ChainBuilder::root(CreateContainer::new(params, transport)),
        }
    }

    #[must_use]
    pub fn pre_start<S>(self, stage: S) -> Self
    where
        S: Stage<Requirement = CreatedContainer, Product = CreatedContainer>,
    {
        Self {
            chain: self.chain.and_then(stage),
        }
    }

    /// Close the pre-start phase. Nothing can run before start after this.
    pub fn start(self) -> StartedPlan {
        StartedPlan {
            chain: self.chain.and_then(StartContainer::new()),
        }
    }
}

/// Builds the rest of the chain, after the container starts.
pub struct StartedPlan {
    chain: ChainBuilder<RunningContainer>,
}

impl StartedPlan {
    #[must_use]
    pub fn post_start<S>(self, stage: S) -> Self
    where
        S: Stage<Requirement = RunningContainer, Product = RunningContainer>,
    {
        Self {
            chain: self.chain.and_then(stage),
        }
    }

    pub fn build(self) -> Chain<RunningContainer> {
        self.chain.build()
    }
}

/// Turn a resolved manifest into its container chain, in declaration order.
pub fn plan_from_manifest(
    manifest: &ResolvedManifest,
    transport: Arc<dyn ContainerTransport>,
) -> Result<Chain<RunningContainer>, ContainerError> {
    let mut plan = ContainerPlan::new(manifest.params.clone(), transport);
    for action in &manifest.pre_start {
        plan = match action {
            PreStartAction::Copy { local, remote } => {
                plan.pre_start(CopyIntoContainer::new(local.clone(), remote.clone()))
            }
        };
    }

    let mut plan = plan.start();
    for action in &manifest.post_start {
        plan = match action {
            PostStartAction::AwaitLog {
                pattern,
                stream,
                timeout_secs,
            } => plan.post_start(AwaitLogLine::new(
                pattern,
                *stream,
                Duration::from_secs(*timeout_secs),
            )?),
            PostStartAction::Exec { command, env } => {
                plan.post_start(ExecInContainer::new(command.clone()).envs(env.clone()))
            }
            PostStartAction::CopyOut { remote, local } => {
                plan.post_start(CopyFromContainer::new(remote.clone(), local.clone()))
            }
        };
    }
    Ok(plan.build())
}
