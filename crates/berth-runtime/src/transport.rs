use crate::TransportError;
use berth_schema::{ContainerId, ContainerParams, LogStream, PortBinding};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResponse {
    pub id: ContainerId,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Receives log output one line at a time, on a transport-owned thread.
///
/// Returning `ControlFlow::Break` stops the follow and releases whatever the
/// transport holds open for it.
pub type LogCallback = Box<dyn FnMut(&str) -> ControlFlow<()> + Send>;

/// Wire access to a container engine.
///
/// Implementations report a missing container as [`TransportError::NotFound`];
/// callers rely on that to treat an already-gone container as stopped or removed.
pub trait ContainerTransport: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn create(&self, params: &ContainerParams) -> Result<CreatedResponse, TransportError>;

    fn start(&self, id: &ContainerId) -> Result<(), TransportError>;

    fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<(), TransportError>;

    fn remove(&self, id: &ContainerId, force: bool) -> Result<(), TransportError>;

    fn execute(
        &self,
        id: &ContainerId,
        env: &BTreeMap<String, String>,
        command: &[String],
    ) -> Result<ExecOutput, TransportError>;

    fn copy_to(&self, id: &ContainerId, local: &Path, remote: &str) -> Result<(), TransportError>;

    fn copy_from(&self, id: &ContainerId, remote: &str, local: &Path)
        -> Result<(), TransportError>;

    /// Start following `stream` and return without waiting for output.
    fn follow_logs(
        &self,
        id: &ContainerId,
        stream: LogStream,
        on_chunk: LogCallback,
    ) -> Result<(), TransportError>;

    fn port_bindings(&self, id: &ContainerId) -> Result<Vec<PortBinding>, TransportError>;
}

pub fn select_transport(name: &str) -> Result<Arc<dyn ContainerTransport>, TransportError> {
    match name {
        "docker" => Ok(Arc::new(crate::docker::DockerCliTransport::from_env())),
        "mock" => Ok(Arc::new(crate::mock::MockTransport::new())),
        other => Err(TransportError::Engine(format!("unknown transport '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_known_transports() {
        assert_eq!(select_transport("docker").unwrap().name(), "docker");
        assert_eq!(select_transport("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_unknown_transport_fails() {
        assert!(select_transport("podman-rest").is_err());
    }

    #[test]
    fn exec_output_success_is_exit_zero() {
        let ok = ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(ok.success());
        assert!(!ExecOutput { exit_code: 2, ..ok }.success());
    }
}
