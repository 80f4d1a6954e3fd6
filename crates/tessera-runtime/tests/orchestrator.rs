//! Registry bookkeeping, bulk loading and shutdown.

mod common;

use common::{Body, Harness, UnitBuilder};
use tessera_runtime::{ComponentId, ComponentState, RuntimeError};

#[test]
fn test_ids_are_never_reused() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("clock"));

    let a = h.runtime.load_component(&path).unwrap();
    let b = h.runtime.load_component(&path).unwrap();
    let c = h.runtime.load_component(&path).unwrap();
    assert_eq!(
        [a, b, c],
        [ComponentId::new(0), ComponentId::new(1), ComponentId::new(2)]
    );

    h.runtime.deploy_by_id(b).unwrap();
    h.runtime.delete_by_id(b).unwrap();

    let ids: Vec<_> = h
        .runtime
        .list_components()
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, [a, c]);

    let d = h.runtime.load_component(&path).unwrap();
    assert_eq!(d, ComponentId::new(3));
}

#[test]
fn test_ids_survive_shutdown() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("clock"));
    h.runtime.load_component(&path).unwrap();
    h.runtime.load_component(&path).unwrap();

    h.runtime.shutdown().unwrap();
    h.runtime.start().unwrap();
    assert_eq!(h.runtime.load_component(&path).unwrap(), ComponentId::new(2));
}

#[test]
fn test_failed_load_consumes_no_id() {
    let h = Harness::new();
    let bad = h.dir().join("garbage.unit");
    std::fs::write(&bad, b"definitely not wasm").unwrap();

    assert!(matches!(
        h.runtime.load_component(&bad),
        Err(RuntimeError::Load { .. })
    ));
    assert!(matches!(
        h.runtime.load_component(h.dir().join("missing.unit")),
        Err(RuntimeError::Load { .. })
    ));
    assert!(matches!(
        h.runtime.load_component(h.dir().join("clock.wasm")),
        Err(RuntimeError::Load { .. })
    ));

    let good = h.unit(&UnitBuilder::new("clock"));
    assert_eq!(h.runtime.load_component(good).unwrap(), ComponentId::new(0));
}

#[test]
fn test_manifest_naming_missing_export_is_rejected() {
    let h = Harness::new();
    let unit = UnitBuilder::new("dangling")
        .manifest_text("[[entry]]\nkind = \"start\"\nexport = \"nowhere\"\n");
    assert!(matches!(
        h.runtime.load_component(h.unit(&unit)),
        Err(RuntimeError::Load { .. })
    ));
}

#[test]
fn test_load_all_filters_and_sorts() {
    let h = Harness::new();
    h.unit(&UnitBuilder::new("b-second"));
    h.unit(&UnitBuilder::new("a-first"));
    std::fs::write(h.dir().join("notes.txt"), "ignore me").unwrap();
    std::fs::write(h.dir().join("broken.unit"), b"\0asm").unwrap();
    std::fs::create_dir(h.dir().join("nested.unit")).unwrap();

    let ids = h.runtime.load_all(h.dir()).unwrap();
    assert_eq!(ids.len(), 2);

    let names: Vec<_> = h
        .runtime
        .list_components()
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, ["a-first", "b-second"]);
}

#[test]
fn test_load_all_missing_directory() {
    let h = Harness::new();
    assert!(matches!(
        h.runtime.load_all(h.dir().join("nope")),
        Err(RuntimeError::Io(_))
    ));
}

#[test]
fn test_shutdown_stops_started_and_clears() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("clock").lifecycle().provider("time", "now"));

    let a = h.runtime.load_component(&path).unwrap();
    let b = h.runtime.load_component(&path).unwrap();
    for id in [a, b] {
        h.runtime.deploy_by_id(id).unwrap();
        h.runtime.start_by_id(id).unwrap();
    }
    h.runtime.stop_by_id(b).unwrap();
    assert_eq!(h.capabilities.provider_count("time"), 2);

    h.runtime.shutdown().unwrap();
    assert!(!h.runtime.is_running());
    assert_eq!(h.runtime.component_count().unwrap(), 0);
    assert_eq!(h.capabilities.provider_count("time"), 0);
    assert!(matches!(h.runtime.shutdown(), Err(RuntimeError::NotRunning)));
}

#[test]
fn test_shutdown_aborts_on_failed_stop() {
    let h = Harness::new();
    let stubborn = UnitBuilder::new("stubborn")
        .entry("start", "run", Body::AwaitCancel)
        .entry("stop", "halt", Body::Trap);
    let a = h.runtime.load_component(h.unit(&stubborn)).unwrap();
    let b = h
        .runtime
        .load_component(h.unit(&UnitBuilder::new("clock").lifecycle()))
        .unwrap();
    for id in [a, b] {
        h.runtime.deploy_by_id(id).unwrap();
        h.runtime.start_by_id(id).unwrap();
    }
    h.runtime.stop_by_id(b).unwrap();

    match h.runtime.shutdown() {
        Err(RuntimeError::ShutdownAborted { id, .. }) => assert_eq!(id, a),
        other => panic!("expected aborted shutdown, got {other:?}"),
    }
    assert!(h.runtime.is_running());
    assert_eq!(h.runtime.component_count().unwrap(), 2);
    assert_eq!(h.runtime.state_of(a).unwrap(), ComponentState::Started);
    assert_eq!(h.runtime.state_of(b).unwrap(), ComponentState::Stopped);
}

#[test]
fn test_shutdown_stops_in_ascending_order() {
    let h = Harness::new();
    let stubborn = UnitBuilder::new("stubborn")
        .entry("start", "run", Body::AwaitCancel)
        .entry("stop", "halt", Body::Trap);
    let fine = h
        .runtime
        .load_component(h.unit(&UnitBuilder::new("clock").lifecycle()))
        .unwrap();
    let bad = h.runtime.load_component(h.unit(&stubborn)).unwrap();
    for id in [fine, bad] {
        h.runtime.deploy_by_id(id).unwrap();
        h.runtime.start_by_id(id).unwrap();
    }

    assert!(h.runtime.shutdown().is_err());
    // The lower id was stopped before the failure was hit.
    assert_eq!(h.runtime.state_of(fine).unwrap(), ComponentState::Stopped);
    assert_eq!(h.runtime.state_of(bad).unwrap(), ComponentState::Started);
}
