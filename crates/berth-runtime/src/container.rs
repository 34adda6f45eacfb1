//! The container resource: its states, the handle stages share, and the
//! create and start stages that move it through those states.

use crate::transport::{ContainerTransport, ExecOutput, LogCallback};
use crate::ContainerError;
use berth_core::{BoxError, Stage};
use berth_schema::{
    CommandType, ContainerId, ContainerName, ContainerParams, HostAddress, ImageRef, LogStream,
    PortBinding, Protocol,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Defined,
    Created,
    Started,
    Stopped,
    Removed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Defined => write!(f, "defined"),
            ContainerState::Created => write!(f, "created"),
            ContainerState::Started => write!(f, "started"),
            ContainerState::Stopped => write!(f, "stopped"),
            ContainerState::Removed => write!(f, "removed"),
        }
    }
}

pub fn validate_transition(from: ContainerState, to: ContainerState) -> Result<(), ContainerError> {
    let valid = matches!(
        (from, to),
        (ContainerState::Defined, ContainerState::Created)
            | (ContainerState::Created, ContainerState::Started)
            | (ContainerState::Started, ContainerState::Stopped)
            | (
                ContainerState::Created | ContainerState::Started | ContainerState::Stopped,
                ContainerState::Removed
            )
    );

    if valid {
        Ok(())
    } else {
        Err(ContainerError::InvalidTransition { from, to })
    }
}

/// Who removes the container once it stops. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stickiness {
    /// The engine removes the container itself when it stops.
    AutoRemoveEnabled,
    /// The container stays until it is removed explicitly.
    ManualRemoveRequired,
}

impl Stickiness {
    pub fn from_params(params: &ContainerParams) -> Self {
        if params.auto_remove() {
            Stickiness::AutoRemoveEnabled
        } else {
            Stickiness::ManualRemoveRequired
        }
    }

    pub fn auto_remove(self) -> bool {
        self == Stickiness::AutoRemoveEnabled
    }
}

/// What the create stage learned about the container. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: Option<ContainerName>,
    pub image: ImageRef,
    pub stickiness: Stickiness,
    pub command_type: CommandType,
    pub stop_timeout_secs: u64,
    pub warnings: Vec<String>,
}

impl ContainerInfo {
    /// Whether teardown must stop the container before it can go away.
    ///
    /// A container whose command exits on its own is never stopped.
    pub fn stop_required(&self) -> bool {
        self.command_type.requires_stop()
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

struct Inner {
    transport: Arc<dyn ContainerTransport>,
    info: ContainerInfo,
    state: Mutex<ContainerState>,
}

/// Shared handle to one created container.
///
/// Every stage that touches the container holds a clone; state changes made
/// by one stage are visible to the others.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    fn new(transport: Arc<dyn ContainerTransport>, info: ContainerInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                info,
                state: Mutex::new(ContainerState::Created),
            }),
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.inner.info.id
    }

    pub fn info(&self) -> &ContainerInfo {
        &self.inner.info
    }

    pub fn state(&self) -> ContainerState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the container has been started, even if it later stopped.
    pub fn was_started(&self) -> bool {
        matches!(
            self.state(),
            ContainerState::Started | ContainerState::Stopped
        )
    }

    fn transition(&self, to: ContainerState) -> Result<(), ContainerError> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        validate_transition(*state, to)?;
        debug!("container {} {} -> {to}", self.id().short(), *state);
        *state = to;
        Ok(())
    }

    fn transport(&self) -> &dyn ContainerTransport {
        self.inner.transport.as_ref()
    }

    /// Run a command inside the container. A non-zero exit is not an error here.
    pub fn exec(
        &self,
        env: &BTreeMap<String, String>,
        command: &[String],
    ) -> Result<ExecOutput, ContainerError> {
        self.transport()
            .execute(self.id(), env, command)
            .map_err(ContainerError::transport("exec"))
    }

    pub fn copy_to(&self, local: &Path, remote: &str) -> Result<(), ContainerError> {
        self.transport()
            .copy_to(self.id(), local, remote)
            .map_err(ContainerError::transport("copy-to"))
    }

    pub fn copy_from(&self, remote: &str, local: &Path) -> Result<(), ContainerError> {
        self.transport()
            .copy_from(self.id(), remote, local)
            .map_err(ContainerError::transport("copy-from"))
    }

    pub fn follow_logs(&self, stream: LogStream, on_chunk: LogCallback) -> Result<(), ContainerError> {
        self.transport()
            .follow_logs(self.id(), stream, on_chunk)
            .map_err(ContainerError::transport("follow-logs"))
    }

    pub fn port_bindings(&self) -> Result<Vec<PortBinding>, ContainerError> {
        self.transport()
            .port_bindings(self.id())
            .map_err(ContainerError::transport("port-bindings"))
    }

    /// The host address a container port is published on, if it is bound.
    pub fn host_port(
        &self,
        container_port: u16,
        protocol: Protocol,
    ) -> Result<Option<HostAddress>, ContainerError> {
        Ok(self
            .port_bindings()?
            .into_iter()
            .filter(|b| b.container_port == container_port && b.protocol == protocol)
            .find_map(|b| b.host))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A container that exists but has not been started. Pre-start stages take and return this.
#[derive(Debug, Clone)]
pub struct CreatedContainer(Container);

impl Deref for CreatedContainer {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.0
    }
}

/// A started container. Post-start stages take and return this; a provider hands it out.
#[derive(Debug, Clone)]
pub struct RunningContainer(Container);

impl Deref for RunningContainer {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.0
    }
}

impl RunningContainer {
    pub fn container(&self) -> &Container {
        &self.0
    }
}

/// Root stage: creates the container, and removes it on decommission unless the
/// engine will.
pub struct CreateContainer {
    params: ContainerParams,
    transport: Arc<dyn ContainerTransport>,
    container: Option<Container>,
}

impl CreateContainer {
    pub fn new(params: ContainerParams, transport: Arc<dyn ContainerTransport>) -> Self {
        Self {
            params,
            transport,
            container: None,
        }
    }
}

impl Stage for CreateContainer {
    type Requirement = ();
    type Product = CreatedContainer;

    fn name(&self) -> &str {
        "create-container"
    }

    fn commission(&mut self, (): ()) -> Result<CreatedContainer, BoxError> {
        self.params.validate().map_err(ContainerError::from)?;

        let response = self
            .transport
            .create(&self.params)
            .map_err(ContainerError::transport("create"))?;
        for warning in &response.warnings {
            warn!("engine warning creating {}: {warning}", self.params.image);
        }

        let info = ContainerInfo {
            id: response.id,
            name: self.params.name.clone(),
            image: self.params.image.clone(),
            stickiness: Stickiness::from_params(&self.params),
            command_type: self.params.command_type,
            stop_timeout_secs: self.params.stop_timeout_secs,
            warnings: response.warnings,
        };
        info!("created container {} from {}", info.id.short(), info.image);

        let container = Container::new(Arc::clone(&self.transport), info);
        self.container = Some(container.clone());
        Ok(CreatedContainer(container))
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        let Some(container) = self.container.take() else {
            return Ok(());
        };

        if container.info().stickiness.auto_remove() && container.was_started() {
            debug!(
                "container {} is removed by the engine",
                container.id().short()
            );
            return Ok(container.transition(ContainerState::Removed)?);
        }

        match container.transport().remove(container.id(), true) {
            Ok(()) => info!("removed container {}", container.id().short()),
            Err(e) if e.is_not_found() => {
                debug!("container {} already gone", container.id().short());
            }
            Err(e) => return Err(ContainerError::transport("remove")(e).into()),
        }
        Ok(container.transition(ContainerState::Removed)?)
    }
}

/// Starts the container, and stops it on decommission when its command keeps running.
#[derive(Default)]
pub struct StartContainer {
    container: Option<Container>,
}

impl StartContainer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for StartContainer {
    type Requirement = CreatedContainer;
    type Product = RunningContainer;

    fn name(&self) -> &str {
        "start-container"
    }

    fn commission(&mut self, created: CreatedContainer) -> Result<RunningContainer, BoxError> {
        let container = created.0;
        container
            .transport()
            .start(container.id())
            .map_err(ContainerError::transport("start"))?;
        container.transition(ContainerState::Started)?;
        info!("started container {}", container.id().short());

        self.container = Some(container.clone());
        Ok(RunningContainer(container))
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        let Some(container) = self.container.take() else {
            return Ok(());
        };

        if !container.info().stop_required() {
            debug!(
                "container {} exits on its own, not stopping",
                container.id().short()
            );
            return Ok(());
        }

        match container
            .transport()
            .stop(container.id(), container.info().stop_timeout())
        {
            Ok(()) => info!("stopped container {}", container.id().short()),
            Err(e) if e.is_not_found() => {
                debug!("container {} already stopped", container.id().short());
            }
            Err(e) => return Err(ContainerError::transport("stop")(e).into()),
        }
        Ok(container.transition(ContainerState::Stopped)?)
    }
}
