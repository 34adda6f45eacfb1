use crate::transport::{ContainerTransport, CreatedResponse, ExecOutput, LogCallback};
use crate::TransportError;
use berth_schema::{
    parse_port_list, AccessMode, ContainerId, ContainerParams, LogStream, PortBinding,
};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// Overrides the docker binary the CLI transport runs.
pub const DOCKER_ENV: &str = "BERTH_DOCKER";

/// Talks to the engine by running the `docker` command line client.
pub struct DockerCliTransport {
    binary: PathBuf,
}

impl Default for DockerCliTransport {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
        }
    }
}

impl DockerCliTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Use `$BERTH_DOCKER` when set, `docker` from `PATH` otherwise.
    pub fn from_env() -> Self {
        match std::env::var_os(DOCKER_ENV) {
            Some(binary) if !binary.is_empty() => Self::with_binary(binary),
            _ => Self::default(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn run(&self, args: &[String]) -> Result<Output, TransportError> {
        debug!("{} {}", self.binary.display(), args.join(" "));
        let output = self.command().args(args).output()?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    /// Arguments for `docker create`, without the binary.
    pub fn create_args(params: &ContainerParams) -> Vec<String> {
        let mut args = vec!["create".to_owned()];
        if let Some(name) = &params.name {
            args.push("--name".to_owned());
            args.push(name.to_string());
        }
        if params.auto_remove() {
            args.push("--rm".to_owned());
        }
        args.push("--stop-timeout".to_owned());
        args.push(params.stop_timeout_secs.to_string());

        for port in &params.ports {
            args.push("--publish".to_owned());
            match port.host_port {
                Some(host) => args.push(format!(
                    "{host}:{}/{}",
                    port.container_port, port.protocol
                )),
                None => args.push(format!("{}/{}", port.container_port, port.protocol)),
            }
        }
        for (key, value) in &params.env {
            args.push("--env".to_owned());
            args.push(format!("{key}={value}"));
        }
        for mount in &params.bind_mounts {
            let mode = match mount.mode {
                AccessMode::ReadOnly => "ro",
                AccessMode::ReadWrite => "rw",
            };
            args.push("--volume".to_owned());
            args.push(format!(
                "{}:{}:{mode}",
                mount.host_dir.display(),
                mount.container_dir
            ));
        }
        for path in &params.tmpfs {
            args.push("--tmpfs".to_owned());
            args.push(path.clone());
        }
        for (key, value) in &params.labels {
            args.push("--label".to_owned());
            args.push(format!("{key}={value}"));
        }

        args.push(params.image.to_string());
        args.extend(params.command.iter().cloned());
        args
    }
}

fn classify_failure(stderr: &str) -> TransportError {
    let message = stderr.trim().to_owned();
    if message.contains("No such container") || message.contains("No such object") {
        TransportError::NotFound(message)
    } else {
        TransportError::Engine(message)
    }
}

fn container_path(id: &ContainerId, path: &str) -> String {
    format!("{id}:{path}")
}

impl ContainerTransport for DockerCliTransport {
    fn name(&self) -> &str {
        "docker"
    }

    fn available(&self) -> bool {
        self.command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn create(&self, params: &ContainerParams) -> Result<CreatedResponse, TransportError> {
        let output = self.run(&Self::create_args(params))?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if id.is_empty() {
            return Err(TransportError::Engine(
                "docker create printed no container id".to_owned(),
            ));
        }
        let warnings = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(CreatedResponse {
            id: ContainerId::new(id),
            warnings,
        })
    }

    fn start(&self, id: &ContainerId) -> Result<(), TransportError> {
        self.run(&["start".to_owned(), id.to_string()])?;
        Ok(())
    }

    fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<(), TransportError> {
        self.run(&[
            "stop".to_owned(),
            "--time".to_owned(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ])?;
        Ok(())
    }

    fn remove(&self, id: &ContainerId, force: bool) -> Result<(), TransportError> {
        let mut args = vec!["rm".to_owned()];
        if force {
            args.push("--force".to_owned());
        }
        args.push(id.to_string());
        self.run(&args)?;
        Ok(())
    }

    fn execute(
        &self,
        id: &ContainerId,
        env: &BTreeMap<String, String>,
        command: &[String],
    ) -> Result<ExecOutput, TransportError> {
        let mut args = vec!["exec".to_owned()];
        for (key, value) in env {
            args.push("--env".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.push(id.to_string());
        args.extend(command.iter().cloned());

        debug!("{} {}", self.binary.display(), args.join(" "));
        let output = self.command().args(&args).output()?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let Some(exit_code) = output.status.code() else {
            return Err(TransportError::Engine(format!(
                "docker exec was killed by a signal: {}",
                stderr.trim()
            )));
        };
        // docker exits 125-127 itself when the exec could not be set up at all
        if (125..=127).contains(&exit_code) && stderr.contains("No such container") {
            return Err(classify_failure(&stderr));
        }
        Ok(ExecOutput {
            exit_code: i64::from(exit_code),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    fn copy_to(&self, id: &ContainerId, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.run(&[
            "cp".to_owned(),
            local.display().to_string(),
            container_path(id, remote),
        ])?;
        Ok(())
    }

    fn copy_from(
        &self,
        id: &ContainerId,
        remote: &str,
        local: &Path,
    ) -> Result<(), TransportError> {
        self.run(&[
            "cp".to_owned(),
            container_path(id, remote),
            local.display().to_string(),
        ])?;
        Ok(())
    }

    fn follow_logs(
        &self,
        id: &ContainerId,
        stream: LogStream,
        mut on_chunk: LogCallback,
    ) -> Result<(), TransportError> {
        let mut cmd = self.command();
        cmd.args(["logs", "--follow", id.as_str()]);
        match stream {
            LogStream::Stdout => cmd.stdout(Stdio::piped()).stderr(Stdio::null()),
            LogStream::Stderr => cmd.stdout(Stdio::null()).stderr(Stdio::piped()),
        };
        let mut child = cmd.spawn()?;

        let pipe: Box<dyn Read + Send> = match stream {
            LogStream::Stdout => match child.stdout.take() {
                Some(out) => Box::new(out),
                None => return Err(TransportError::Engine("no stdout pipe".to_owned())),
            },
            LogStream::Stderr => match child.stderr.take() {
                Some(err) => Box::new(err),
                None => return Err(TransportError::Engine("no stderr pipe".to_owned())),
            },
        };

        let short = id.short().to_owned();
        std::thread::spawn(move || {
            for line in BufReader::new(pipe).lines() {
                match line {
                    Ok(line) => {
                        if on_chunk(&line).is_break() {
                            debug!("no longer following logs for {short}");
                            let _ = child.kill();
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("log follow for {short} ended: {e}");
                        break;
                    }
                }
            }
            let _ = child.wait();
        });
        Ok(())
    }

    fn port_bindings(&self, id: &ContainerId) -> Result<Vec<PortBinding>, TransportError> {
        let output = self.run(&[
            "ps".to_owned(),
            "--all".to_owned(),
            "--no-trunc".to_owned(),
            "--filter".to_owned(),
            format!("id={id}"),
            "--format".to_owned(),
            "{{.Ports}}".to_owned(),
        ])?;
        let listing = String::from_utf8_lossy(&output.stdout);
        let Some(line) = listing.lines().next() else {
            return Err(TransportError::NotFound(format!("no such container: {id}")));
        };
        Ok(parse_port_list(line)?)
    }
}
