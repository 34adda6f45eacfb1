use berth_core::{
    stage_fn, CachingProvider, EventKind, EventSink, ExitHooks, ManualExitHooks, RecordingSink,
    ScopePolicy,
};
use berth_runtime::{
    ContainerPlan, ContainerState, ContainerTransport, CreatedContainer, MockTransport, Operation,
};
use berth_schema::{CommandType, ContainerParams, ImageRef, Protocol};
use std::sync::{Arc, Barrier};
use std::thread;

fn params(disable_auto_remove: bool) -> ContainerParams {
    ContainerParams::builder(ImageRef::parse("localhost:5000/team/api:2.4").unwrap())
        .command(CommandType::Blocking, ["serve", "--port", "8080"])
        .expose(8080, Protocol::Tcp)
        .disable_auto_remove(disable_auto_remove)
        .build()
}

fn transport(mock: &Arc<MockTransport>) -> Arc<dyn ContainerTransport> {
    Arc::clone(mock) as Arc<dyn ContainerTransport>
}

#[test]
fn started_auto_remove_container_is_stopped_never_removed() {
    let mock = Arc::new(MockTransport::new());
    let chain = ContainerPlan::new(params(false), transport(&mock))
        .start()
        .build();
    let provider = CachingProvider::from_chain(chain, ScopePolicy::Local);

    let running = provider.provide().get().unwrap();
    assert_eq!(running.state(), ContainerState::Started);
    provider.finish().unwrap();

    assert_eq!(
        mock.operations(),
        [Operation::Create, Operation::Start, Operation::Stop]
    );
    assert_eq!(running.state(), ContainerState::Removed);
    assert_eq!(mock.live_containers(), 0);
}

#[test]
fn sticky_container_failing_before_start_is_force_removed_without_stop() {
    let mock = Arc::new(MockTransport::new());
    let chain = ContainerPlan::new(params(true), transport(&mock))
        .pre_start(stage_fn(
            "seed-data",
            |_: CreatedContainer| Err("seed archive is corrupt".into()),
            || Ok(()),
        ))
        .start()
        .build();
    let provider = CachingProvider::from_chain(chain, ScopePolicy::Local);

    let provision = provider.provide();
    let err = provision.get().unwrap_err();
    let failure = err.commission_failure().unwrap();
    assert_eq!(failure.stage.name, "seed-data");
    assert!(failure.unwind.is_none());

    assert_eq!(mock.operations(), [Operation::Create, Operation::Remove]);
    let remove = &mock.calls()[1];
    assert_eq!(remove.detail, "force=true");
    assert_eq!(mock.live_containers(), 0);
}

#[test]
fn sticky_started_container_is_stopped_then_removed() {
    let mock = Arc::new(MockTransport::new());
    let chain = ContainerPlan::new(params(true), transport(&mock))
        .start()
        .build();
    let provider = CachingProvider::from_chain(chain, ScopePolicy::Local);

    provider.provide().get().unwrap();
    provider.finish().unwrap();
    assert_eq!(
        mock.operations(),
        [
            Operation::Create,
            Operation::Start,
            Operation::Stop,
            Operation::Remove
        ]
    );
}

#[test]
fn stop_not_found_counts_as_already_stopped() {
    let mock = Arc::new(MockTransport::new());
    mock.fail_not_found(Operation::Stop);
    let chain = ContainerPlan::new(params(true), transport(&mock))
        .start()
        .build();
    let provider = CachingProvider::from_chain(chain, ScopePolicy::Local);

    let running = provider.provide().get().unwrap();
    provider.finish().unwrap();
    assert_eq!(running.state(), ContainerState::Removed);
    assert_eq!(mock.count(Operation::Remove), 1);
}

#[test]
fn failed_start_unwinds_create_and_surfaces_unwind_errors() {
    let mock = Arc::new(MockTransport::new());
    mock.fail(Operation::Start, "port is already allocated");
    mock.fail(Operation::Remove, "removal of container is already in progress");
    let chain = ContainerPlan::new(params(true), transport(&mock))
        .start()
        .build();
    let provider = CachingProvider::from_chain(chain, ScopePolicy::Local);

    let err = provider.provide().get().unwrap_err();
    let failure = err.commission_failure().unwrap();
    assert_eq!(failure.stage.name, "start-container");
    assert!(failure.cause.to_string().contains("port is already allocated"));
    let unwind = failure.unwind.as_ref().unwrap();
    assert_eq!(unwind.failures.keys().next().unwrap().name, "create-container");
    assert_eq!(mock.count(Operation::Stop), 0);
}

#[test]
fn concurrent_global_provides_create_one_container_and_one_hook() {
    let mock = Arc::new(MockTransport::new());
    let hooks = Arc::new(ManualExitHooks::new());
    let sink = Arc::new(RecordingSink::new());
    let chain = ContainerPlan::new(params(false), transport(&mock))
        .start()
        .build();
    let provider = Arc::new(CachingProvider::with_events(
        chain.into_lifecycle(),
        ScopePolicy::Global(Arc::clone(&hooks) as Arc<dyn ExitHooks>),
        Arc::clone(&sink) as Arc<dyn EventSink>,
    ));

    let barrier = Arc::new(Barrier::new(50));
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let provider = Arc::clone(&provider);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                provider.provide().get().unwrap().id().clone()
            })
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(mock.count(Operation::Create), 1);
    assert_eq!(hooks.pending(), 1);
    assert_eq!(sink.count(EventKind::CommissionStarted), 1);

    provider.finish().unwrap();
    assert_eq!(mock.count(Operation::Stop), 0);

    hooks.fire();
    assert_eq!(mock.count(Operation::Stop), 1);
    assert_eq!(mock.live_containers(), 0);
}
