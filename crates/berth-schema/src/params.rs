use crate::image::ImageRef;
use crate::ports::Protocol;
use crate::types::ContainerName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("container port must be non-zero")]
    ZeroContainerPort,
    #[error("container path '{0}' must be absolute")]
    RelativeContainerPath(String),
    #[error("invalid environment variable name '{0}'")]
    InvalidEnvName(String),
    #[error("label keys must not be empty")]
    EmptyLabelKey,
}

/// How the container's command is expected to behave once started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandType {
    /// Runs until something stops it (servers, daemons).
    #[default]
    Blocking,
    /// Runs to completion on its own (migrations, one-shot jobs).
    ExitingImmediately,
}

impl CommandType {
    /// Whether teardown has to stop the container explicitly.
    pub fn requires_stop(self) -> bool {
        matches!(self, CommandType::Blocking)
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandType::Blocking => write!(f, "blocking"),
            CommandType::ExitingImmediately => write!(f, "exiting-immediately"),
        }
    }
}

/// One of a container's two output streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host_dir: PathBuf,
    pub container_dir: String,
    pub mode: AccessMode,
}

/// A port the container exposes, optionally published on a fixed host port.
///
/// `host_port: Some(0)` asks the engine to pick a free host port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_port: Option<u16>,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerParams {
    pub image: ImageRef,
    pub name: Option<ContainerName>,
    pub command: Vec<String>,
    pub command_type: CommandType,
    pub ports: Vec<PortSpec>,
    pub env: BTreeMap<String, String>,
    pub bind_mounts: Vec<BindMount>,
    pub tmpfs: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub disable_auto_remove: bool,
    pub stop_timeout_secs: u64,
}

impl ContainerParams {
    pub fn builder(image: ImageRef) -> ContainerParamsBuilder {
        ContainerParamsBuilder {
            params: ContainerParams {
                image,
                name: None,
                command: Vec::new(),
                command_type: CommandType::default(),
                ports: Vec::new(),
                env: BTreeMap::new(),
                bind_mounts: Vec::new(),
                tmpfs: Vec::new(),
                labels: BTreeMap::new(),
                disable_auto_remove: false,
                stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            },
        }
    }

    /// Whether the engine should remove the container by itself once it stops.
    pub fn auto_remove(&self) -> bool {
        !self.disable_auto_remove
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.ports.iter().any(|p| p.container_port == 0) {
            return Err(ParamsError::ZeroContainerPort);
        }
        for path in self
            .bind_mounts
            .iter()
            .map(|m| &m.container_dir)
            .chain(self.tmpfs.iter())
        {
            if !path.starts_with('/') {
                return Err(ParamsError::RelativeContainerPath(path.clone()));
            }
        }
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(ParamsError::InvalidEnvName(key.clone()));
            }
        }
        if self.labels.keys().any(String::is_empty) {
            return Err(ParamsError::EmptyLabelKey);
        }
        Ok(())
    }
}

pub struct ContainerParamsBuilder {
    params: ContainerParams,
}

impl ContainerParamsBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<ContainerName>) -> Self {
        self.params.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn command<I, S>(mut self, command_type: CommandType, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.command_type = command_type;
        self.params.command = command.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn command_type(mut self, command_type: CommandType) -> Self {
        self.params.command_type = command_type;
        self
    }

    #[must_use]
    pub fn expose(mut self, container_port: u16, protocol: Protocol) -> Self {
        self.params.ports.push(PortSpec {
            container_port,
            protocol,
            host_port: None,
        });
        self
    }

    #[must_use]
    pub fn publish(mut self, container_port: u16, protocol: Protocol, host_port: u16) -> Self {
        self.params.ports.push(PortSpec {
            container_port,
            protocol,
            host_port: Some(host_port),
        });
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn bind(
        mut self,
        host_dir: impl Into<PathBuf>,
        container_dir: impl Into<String>,
        mode: AccessMode,
    ) -> Self {
        self.params.bind_mounts.push(BindMount {
            host_dir: host_dir.into(),
            container_dir: container_dir.into(),
            mode,
        });
        self
    }

    #[must_use]
    pub fn tmpfs(mut self, container_dir: impl Into<String>) -> Self {
        self.params.tmpfs.push(container_dir.into());
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn disable_auto_remove(mut self, disable: bool) -> Self {
        self.params.disable_auto_remove = disable;
        self
    }

    #[must_use]
    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.params.stop_timeout_secs = secs;
        self
    }

    pub fn build(self) -> ContainerParams {
        self.params
    }
}
