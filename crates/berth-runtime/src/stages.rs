//! Stock stages that run between create and start, or after start.
//!
//! None of them acquire anything, so their decommission is a no-op; the
//! container itself is released by the create and start stages.

use crate::container::{CreatedContainer, RunningContainer};
use crate::ContainerError;
use berth_core::{BoxError, Stage};
use berth_schema::LogStream;
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Pre-start: copy a host file or directory into the created container.
pub struct CopyIntoContainer {
    label: String,
    local: PathBuf,
    remote: String,
}

impl CopyIntoContainer {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        let local = local.into();
        let remote = remote.into();
        Self {
            label: format!("copy {} into {remote}", local.display()),
            local,
            remote,
        }
    }
}

impl Stage for CopyIntoContainer {
    type Requirement = CreatedContainer;
    type Product = CreatedContainer;

    fn name(&self) -> &str {
        &self.label
    }

    fn commission(&mut self, container: CreatedContainer) -> Result<CreatedContainer, BoxError> {
        if !self.local.exists() {
            return Err(ContainerError::MissingSource(self.local.clone()).into());
        }
        container.copy_to(&self.local, &self.remote)?;
        debug!("copied {} to {}", self.local.display(), self.remote);
        Ok(container)
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Post-start: copy a path out of the running container onto the host.
///
/// The copied file is left in place on decommission.
pub struct CopyFromContainer {
    label: String,
    remote: String,
    local: PathBuf,
}

impl CopyFromContainer {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        let remote = remote.into();
        let local = local.into();
        Self {
            label: format!("copy {remote} out to {}", local.display()),
            remote,
            local,
        }
    }
}

impl Stage for CopyFromContainer {
    type Requirement = RunningContainer;
    type Product = RunningContainer;

    fn name(&self) -> &str {
        &self.label
    }

    fn commission(&mut self, container: RunningContainer) -> Result<RunningContainer, BoxError> {
        container.copy_from(&self.remote, &self.local)?;
        debug!("copied {} to {}", self.remote, self.local.display());
        Ok(container)
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Post-start: run a command in the container; a non-zero exit fails the commission.
pub struct ExecInContainer {
    label: String,
    command: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ExecInContainer {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        Self {
            label: format!("exec {}", command.join(" ")),
            command,
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }
}

impl Stage for ExecInContainer {
    type Requirement = RunningContainer;
    type Product = RunningContainer;

    fn name(&self) -> &str {
        &self.label
    }

    fn commission(&mut self, container: RunningContainer) -> Result<RunningContainer, BoxError> {
        let output = container.exec(&self.env, &self.command)?;
        if !output.success() {
            return Err(ContainerError::ExecFailed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            }
            .into());
        }
        debug!("{}: {}", self.label, output.stdout.trim_end());
        Ok(container)
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Post-start: wait until a log line matches a pattern.
pub struct AwaitLogLine {
    label: String,
    pattern: Regex,
    stream: LogStream,
    timeout: Duration,
}

impl AwaitLogLine {
    pub fn new(pattern: &str, stream: LogStream, timeout: Duration) -> Result<Self, ContainerError> {
        Ok(Self {
            label: format!("await {stream} /{pattern}/"),
            pattern: Regex::new(pattern)?,
            stream,
            timeout,
        })
    }

    fn timed_out(&self) -> ContainerError {
        ContainerError::ReadinessTimeout {
            pattern: self.pattern.as_str().to_owned(),
            stream: self.stream,
            timeout: self.timeout,
        }
    }
}

impl Stage for AwaitLogLine {
    type Requirement = RunningContainer;
    type Product = RunningContainer;

    fn name(&self) -> &str {
        &self.label
    }

    fn commission(&mut self, container: RunningContainer) -> Result<RunningContainer, BoxError> {
        let (tx, rx) = mpsc::channel::<String>();
        container.follow_logs(
            self.stream,
            Box::new(move |line: &str| {
                // the receiver is gone once a line matched or we timed out
                match tx.send(line.to_owned()) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            }),
        )?;

        // None: the timeout is too far out to represent, so wait without one
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            let next = match deadline {
                Some(deadline) => {
                    rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(line) if self.pattern.is_match(&line) => {
                    info!("container {} is ready: {line}", container.id().short());
                    return Ok(container);
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return Err(self.timed_out().into()),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ContainerError::LogStreamEnded {
                        pattern: self.pattern.as_str().to_owned(),
                        stream: self.stream,
                    }
                    .into());
                }
            }
        }
    }

    fn decommission(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{CreateContainer, StartContainer};
    use crate::mock::{MockTransport, Operation};
    use crate::transport::{ContainerTransport, ExecOutput};
    use berth_core::{ChainBuilder, Lifecycle};
    use berth_schema::{ContainerParams, ImageRef};
    use std::sync::Arc;

    fn lifecycle_with<S>(mock: &Arc<MockTransport>, stage: S) -> Lifecycle<RunningContainer>
    where
        S: Stage<Requirement = RunningContainer, Product = RunningContainer>,
    {
        let params = ContainerParams::builder(ImageRef::parse("redis:7").unwrap()).build();
        ChainBuilder::root(CreateContainer::new(
            params,
            Arc::clone(mock) as Arc<dyn ContainerTransport>,
        ))
        .and_then(StartContainer::new())
        .and_then(stage)
        .build()
        .into_lifecycle()
    }

    #[test]
    fn await_log_line_matches_a_later_line() {
        let mock = Arc::new(MockTransport::new());
        mock.push_log(LogStream::Stdout, "starting");
        mock.push_log(LogStream::Stdout, "Ready to accept connections tcp");
        let stage =
            AwaitLogLine::new("Ready to accept", LogStream::Stdout, Duration::from_secs(5)).unwrap();
        let mut lifecycle = lifecycle_with(&mock, stage);
        lifecycle.commission().unwrap();
        assert_eq!(mock.count(Operation::FollowLogs), 1);
    }

    #[test]
    fn await_log_line_fails_when_the_stream_ends_without_a_match() {
        let mock = Arc::new(MockTransport::new());
        mock.push_log(LogStream::Stdout, "starting");
        let stage = AwaitLogLine::new("^ready$", LogStream::Stdout, Duration::from_secs(5)).unwrap();
        let mut lifecycle = lifecycle_with(&mock, stage);
        let err = lifecycle.commission().unwrap_err();
        assert!(err.to_string().contains("ended before a line matched"));
        // create and start were rolled back
        assert_eq!(mock.count(Operation::Stop), 1);
    }

    #[test]
    fn await_log_line_waits_without_deadline_when_timeout_is_unrepresentable() {
        let mock = Arc::new(MockTransport::new());
        mock.push_log(LogStream::Stdout, "Ready to accept connections tcp");
        let stage = AwaitLogLine::new("Ready", LogStream::Stdout, Duration::MAX).unwrap();
        let mut lifecycle = lifecycle_with(&mock, stage);
        lifecycle.commission().unwrap();
        lifecycle.decommission().unwrap();
        assert_eq!(mock.count(Operation::Stop), 1);
    }

    #[test]
    fn unrepresentable_timeout_still_rolls_back_when_the_stream_ends() {
        let mock = Arc::new(MockTransport::new());
        mock.push_log(LogStream::Stdout, "starting");
        let stage =
            AwaitLogLine::new("^ready$", LogStream::Stdout, Duration::from_secs(u64::MAX)).unwrap();
        let mut lifecycle = lifecycle_with(&mock, stage);
        let err = lifecycle.commission().unwrap_err();
        assert!(err.to_string().contains("ended before a line matched"));
        assert_eq!(mock.count(Operation::Stop), 1);
        assert_eq!(mock.live_containers(), 0);
    }

    #[test]
    fn await_log_line_rejects_bad_patterns() {
        assert!(matches!(
            AwaitLogLine::new("(unclosed", LogStream::Stdout, Duration::from_secs(1)),
            Err(ContainerError::Pattern(_))
        ));
    }

    #[test]
    fn failing_exec_carries_exit_code_and_stderr() {
        let mock = Arc::new(MockTransport::new());
        mock.set_exec_output(ExecOutput {
            exit_code: 3,
            stdout: String::new(),
            stderr: "migration failed\n".to_owned(),
        });
        let mut lifecycle = lifecycle_with(&mock, ExecInContainer::new(["migrate", "up"]));
        let err = lifecycle.commission().unwrap_err();
        let failure = err.commission_failure().unwrap();
        assert_eq!(failure.stage.name, "exec migrate up");
        let cause = failure.cause.downcast_ref::<ContainerError>().unwrap();
        assert!(matches!(
            cause,
            ContainerError::ExecFailed { exit_code: 3, stderr } if stderr == "migration failed"
        ));
    }

    #[test]
    fn successful_exec_passes_the_container_through() {
        let mock = Arc::new(MockTransport::new());
        let stage = ExecInContainer::new(["redis-cli", "ping"]).env("REDISCLI_AUTH", "x");
        let mut lifecycle = lifecycle_with(&mock, stage);
        let running = lifecycle.commission().unwrap();
        assert!(mock.is_running(running.id()));
        let exec = mock
            .calls()
            .into_iter()
            .find(|c| c.operation == Operation::Execute)
            .unwrap();
        assert_eq!(exec.detail, "redis-cli ping");
    }

    #[test]
    fn copy_into_requires_an_existing_source() {
        let mock = Arc::new(MockTransport::new());
        let params = ContainerParams::builder(ImageRef::parse("redis:7").unwrap()).build();
        let mut lifecycle = ChainBuilder::root(CreateContainer::new(
            params,
            Arc::clone(&mock) as Arc<dyn ContainerTransport>,
        ))
        .and_then(CopyIntoContainer::new("/nonexistent/redis.conf", "/etc/redis.conf"))
        .and_then(StartContainer::new())
        .build()
        .into_lifecycle();

        let err = lifecycle.commission().unwrap_err();
        assert!(err.to_string().contains("nothing to copy"));
        assert_eq!(
            mock.operations(),
            [Operation::Create, Operation::Remove]
        );
    }

    #[test]
    fn copy_from_lands_on_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dump.rdb");
        let mock = Arc::new(MockTransport::new());
        let mut lifecycle =
            lifecycle_with(&mock, CopyFromContainer::new("/data/dump.rdb", &target));
        lifecycle.commission().unwrap();
        lifecycle.decommission().unwrap();
        assert!(target.exists());
    }
}
