use crate::transport::{ContainerTransport, CreatedResponse, ExecOutput, LogCallback};
use crate::TransportError;
use berth_schema::{parse_port_list, ContainerId, ContainerParams, LogStream, PortBinding};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const FIRST_HOST_PORT: u16 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Start,
    Stop,
    Remove,
    Execute,
    CopyTo,
    CopyFrom,
    FollowLogs,
    PortBindings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: Operation,
    pub id: Option<ContainerId>,
    pub detail: String,
}

enum Failure {
    NotFound,
    Engine(String),
}

struct MockContainer {
    params: ContainerParams,
    running: bool,
    ports: String,
}

#[derive(Default)]
struct State {
    calls: Vec<MockCall>,
    containers: HashMap<ContainerId, MockContainer>,
    created: u64,
    next_host_port: u16,
    failures: HashMap<Operation, Failure>,
    create_warnings: Vec<String>,
    exec_output: Option<ExecOutput>,
    logs: HashMap<LogStream, Vec<String>>,
}

/// An in-memory engine that records every call.
///
/// It behaves like a real engine where the lifecycle can observe it: ids are
/// stable per creation order, auto-remove containers disappear when stopped,
/// and anything addressed to a missing container is `NotFound`. Failures can
/// be scripted per operation.
pub struct MockTransport {
    state: Mutex<State>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                next_host_port: FIRST_HOST_PORT,
                ..State::default()
            }),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later call of `operation` fail with an engine error.
    pub fn fail(&self, operation: Operation, message: &str) {
        self.lock()
            .failures
            .insert(operation, Failure::Engine(message.to_owned()));
    }

    /// Make every later call of `operation` report the container as missing.
    pub fn fail_not_found(&self, operation: Operation) {
        self.lock().failures.insert(operation, Failure::NotFound);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn warn_on_create(&self, warning: &str) {
        self.lock().create_warnings.push(warning.to_owned());
    }

    pub fn set_exec_output(&self, output: ExecOutput) {
        self.lock().exec_output = Some(output);
    }

    /// Queue a line that every later `follow_logs` on `stream` will deliver.
    pub fn push_log(&self, stream: LogStream, line: &str) {
        self.lock()
            .logs
            .entry(stream)
            .or_default()
            .push(line.to_owned());
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(|c| c.operation).collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Containers the engine still knows about.
    pub fn live_containers(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn is_running(&self, id: &ContainerId) -> bool {
        self.lock().containers.get(id).is_some_and(|c| c.running)
    }
}

impl State {
    fn record(
        &mut self,
        operation: Operation,
        id: Option<&ContainerId>,
        detail: String,
    ) -> Result<(), TransportError> {
        self.calls.push(MockCall {
            operation,
            id: id.cloned(),
            detail,
        });
        match self.failures.get(&operation) {
            None => Ok(()),
            Some(Failure::NotFound) => Err(TransportError::NotFound(
                id.map_or_else(|| "object".to_owned(), ToString::to_string),
            )),
            Some(Failure::Engine(message)) => Err(TransportError::Engine(message.clone())),
        }
    }

    fn container(&mut self, id: &ContainerId) -> Result<&mut MockContainer, TransportError> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| TransportError::NotFound(format!("no such container: {id}")))
    }

    fn running(&mut self, id: &ContainerId) -> Result<&mut MockContainer, TransportError> {
        let container = self.container(id)?;
        if container.running {
            Ok(container)
        } else {
            Err(TransportError::Engine(format!("container {id} is not running")))
        }
    }

    fn assign_ports(&mut self, params: &ContainerParams) -> String {
        let mut listing = Vec::new();
        for spec in &params.ports {
            let host_port = match spec.host_port {
                Some(port) if port != 0 => port,
                _ => {
                    let port = self.next_host_port;
                    self.next_host_port = self.next_host_port.wrapping_add(1);
                    port
                }
            };
            listing.push(format!(
                "0.0.0.0:{host_port}->{}/{}",
                spec.container_port, spec.protocol
            ));
        }
        listing.join(", ")
    }
}

impl ContainerTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn create(&self, params: &ContainerParams) -> Result<CreatedResponse, TransportError> {
        let mut state = self.lock();
        state.record(Operation::Create, None, params.image.to_string())?;

        state.created += 1;
        let id = ContainerId::new(
            blake3::hash(format!("mock-container:{}:{}", state.created, params.image).as_bytes())
                .to_hex()
                .to_string(),
        );
        state.containers.insert(
            id.clone(),
            MockContainer {
                params: params.clone(),
                running: false,
                ports: String::new(),
            },
        );
        Ok(CreatedResponse {
            id,
            warnings: state.create_warnings.clone(),
        })
    }

    fn start(&self, id: &ContainerId) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(Operation::Start, Some(id), String::new())?;

        let params = state.container(id)?.params.clone();
        let ports = state.assign_ports(&params);
        let container = state.container(id)?;
        container.running = true;
        container.ports = ports;
        Ok(())
    }

    fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(Operation::Stop, Some(id), format!("{}s", timeout.as_secs()))?;

        let container = state.container(id)?;
        container.running = false;
        if container.params.auto_remove() {
            state.containers.remove(id);
        }
        Ok(())
    }

    fn remove(&self, id: &ContainerId, force: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(Operation::Remove, Some(id), format!("force={force}"))?;

        if state.container(id)?.running && !force {
            return Err(TransportError::Engine(format!(
                "cannot remove running container {id} without force"
            )));
        }
        state.containers.remove(id);
        Ok(())
    }

    fn execute(
        &self,
        id: &ContainerId,
        _env: &BTreeMap<String, String>,
        command: &[String],
    ) -> Result<ExecOutput, TransportError> {
        let mut state = self.lock();
        let joined = command.join(" ");
        state.record(Operation::Execute, Some(id), joined.clone())?;
        state.running(id)?;

        Ok(state.exec_output.clone().unwrap_or_else(|| ExecOutput {
            exit_code: 0,
            stdout: format!("mock-exec: {joined}\n"),
            stderr: String::new(),
        }))
    }

    fn copy_to(&self, id: &ContainerId, local: &Path, remote: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(
            Operation::CopyTo,
            Some(id),
            format!("{} -> {remote}", local.display()),
        )?;
        state.container(id)?;

        if !local.exists() {
            return Err(TransportError::NotFound(local.display().to_string()));
        }
        Ok(())
    }

    fn copy_from(
        &self,
        id: &ContainerId,
        remote: &str,
        local: &Path,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.record(
            Operation::CopyFrom,
            Some(id),
            format!("{remote} -> {}", local.display()),
        )?;
        state.container(id)?;

        std::fs::write(local, format!("mock-copy:{remote}\n"))?;
        Ok(())
    }

    fn follow_logs(
        &self,
        id: &ContainerId,
        stream: LogStream,
        mut on_chunk: LogCallback,
    ) -> Result<(), TransportError> {
        let lines = {
            let mut state = self.lock();
            state.record(Operation::FollowLogs, Some(id), stream.to_string())?;
            state.container(id)?;
            state.logs.get(&stream).cloned().unwrap_or_default()
        };

        std::thread::spawn(move || {
            for line in &lines {
                if on_chunk(line).is_break() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn port_bindings(&self, id: &ContainerId) -> Result<Vec<PortBinding>, TransportError> {
        let mut state = self.lock();
        state.record(Operation::PortBindings, Some(id), String::new())?;

        let listing = state.container(id)?.ports.clone();
        Ok(parse_port_list(&listing)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_schema::{ImageRef, Protocol};
    use std::ops::ControlFlow;
    use std::sync::mpsc;

    fn params(auto_remove: bool) -> ContainerParams {
        ContainerParams::builder(ImageRef::parse("nginx:1.27").unwrap())
            .expose(80, Protocol::Tcp)
            .publish(443, Protocol::Tcp, 8443)
            .disable_auto_remove(!auto_remove)
            .build()
    }

    #[test]
    fn ids_are_deterministic_per_creation_order() {
        let a = MockTransport::new();
        let b = MockTransport::new();
        let first_a = a.create(&params(true)).unwrap().id;
        let first_b = b.create(&params(true)).unwrap().id;
        let second_a = a.create(&params(true)).unwrap().id;
        assert_eq!(first_a, first_b);
        assert_ne!(first_a, second_a);
    }

    #[test]
    fn auto_remove_containers_vanish_on_stop() {
        let mock = MockTransport::new();
        let id = mock.create(&params(true)).unwrap().id;
        mock.start(&id).unwrap();
        assert!(mock.is_running(&id));

        mock.stop(&id, Duration::from_secs(10)).unwrap();
        assert_eq!(mock.live_containers(), 0);
        assert!(mock.remove(&id, true).unwrap_err().is_not_found());
    }

    #[test]
    fn sticky_containers_stay_until_removed() {
        let mock = MockTransport::new();
        let id = mock.create(&params(false)).unwrap().id;
        mock.start(&id).unwrap();
        assert!(mock.remove(&id, false).is_err());
        mock.stop(&id, Duration::from_secs(1)).unwrap();
        assert_eq!(mock.live_containers(), 1);
        mock.remove(&id, false).unwrap();
        assert_eq!(mock.live_containers(), 0);
    }

    #[test]
    fn ports_are_assigned_on_start() {
        let mock = MockTransport::new();
        let id = mock.create(&params(true)).unwrap().id;
        assert!(mock.port_bindings(&id).unwrap().is_empty());

        mock.start(&id).unwrap();
        let bindings = mock.port_bindings(&id).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].to_string(), "0.0.0.0:32768->80/tcp");
        assert_eq!(bindings[1].to_string(), "0.0.0.0:8443->443/tcp");
    }

    #[test]
    fn scripted_failures_are_recorded_then_returned() {
        let mock = MockTransport::new();
        mock.fail(Operation::Create, "pull access denied");
        let err = mock.create(&params(true)).unwrap_err();
        assert!(err.to_string().contains("pull access denied"));
        assert_eq!(mock.count(Operation::Create), 1);

        mock.clear_failures();
        assert!(mock.create(&params(true)).is_ok());
    }

    #[test]
    fn exec_requires_a_running_container() {
        let mock = MockTransport::new();
        let id = mock.create(&params(true)).unwrap().id;
        let cmd = vec!["echo".to_owned(), "hi".to_owned()];
        assert!(mock.execute(&id, &BTreeMap::new(), &cmd).is_err());

        mock.start(&id).unwrap();
        let out = mock.execute(&id, &BTreeMap::new(), &cmd).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "mock-exec: echo hi\n");
    }

    #[test]
    fn follow_logs_delivers_queued_lines() {
        let mock = MockTransport::new();
        mock.push_log(LogStream::Stderr, "booting");
        mock.push_log(LogStream::Stderr, "ready");
        let id = mock.create(&params(true)).unwrap().id;

        let (tx, rx) = mpsc::channel();
        mock.follow_logs(
            &id,
            LogStream::Stderr,
            Box::new(move |line: &str| {
                let _ = tx.send(line.to_owned());
                ControlFlow::Continue(())
            }),
        )
        .unwrap();
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, ["booting", "ready"]);
    }

    #[test]
    fn follow_logs_stops_when_the_callback_breaks() {
        let mock = MockTransport::new();
        for line in ["booting", "ready", "serving"] {
            mock.push_log(LogStream::Stdout, line);
        }
        let id = mock.create(&params(true)).unwrap().id;

        let (tx, rx) = mpsc::channel();
        mock.follow_logs(
            &id,
            LogStream::Stdout,
            Box::new(move |line: &str| {
                let _ = tx.send(line.to_owned());
                if line == "ready" {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }),
        )
        .unwrap();
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, ["booting", "ready"]);
    }

    #[test]
    fn copy_from_writes_the_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        let id = mock.create(&params(true)).unwrap().id;
        let target = dir.path().join("out.log");
        mock.copy_from(&id, "/var/log/app.log", &target).unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "mock-copy:/var/log/app.log\n"
        );
        assert!(mock
            .copy_to(&id, &dir.path().join("missing"), "/tmp/x")
            .unwrap_err()
            .is_not_found());
    }
}
