//! Container resources for berth.
//!
//! This crate puts a container behind the staged lifecycle from `berth-core`:
//! a pluggable `ContainerTransport` (the docker CLI, or an in-memory mock),
//! the container state model with its stickiness and stop rules, the create
//! and start stages, the stock pre-/post-start stages, and `ContainerPlan`,
//! which wires them into a `Chain<RunningContainer>`.

pub mod container;
pub mod docker;
pub mod mock;
pub mod plan;
pub mod stages;
pub mod transport;

pub use container::{
    validate_transition, Container, ContainerInfo, ContainerState, CreateContainer,
    CreatedContainer, RunningContainer, StartContainer, Stickiness,
};
pub use docker::DockerCliTransport;
pub use mock::{MockCall, MockTransport, Operation};
pub use plan::{plan_from_manifest, ContainerPlan, StartedPlan};
pub use stages::{AwaitLogLine, CopyFromContainer, CopyIntoContainer, ExecInContainer};
pub use transport::{select_transport, ContainerTransport, CreatedResponse, ExecOutput, LogCallback};

use berth_schema::{LogStream, ParamsError, PortParseError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unreadable port listing: {0}")]
    Ports(#[from] PortParseError),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container {operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("invalid container transition from {from} to {to}")]
    InvalidTransition {
        from: ContainerState,
        to: ContainerState,
    },
    #[error("command exited with status {exit_code}: {stderr}")]
    ExecFailed { exit_code: i64, stderr: String },
    #[error("no {stream} line matching '{pattern}' within {timeout:?}")]
    ReadinessTimeout {
        pattern: String,
        stream: LogStream,
        timeout: Duration,
    },
    #[error("{stream} ended before a line matched '{pattern}'")]
    LogStreamEnded { pattern: String, stream: LogStream },
    #[error("invalid log pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid container parameters: {0}")]
    Params(#[from] ParamsError),
    #[error("nothing to copy at {}", .0.display())]
    MissingSource(PathBuf),
}

impl ContainerError {
    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(TransportError) -> Self {
        move |source| ContainerError::Transport { operation, source }
    }
}
