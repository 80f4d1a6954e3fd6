//! Independent loads of one unit share nothing.

mod common;

use std::sync::Arc;

use common::{Harness, UnitBuilder};
use tessera_config::SandboxConfig;
use tessera_runtime::{CapabilityRegistry, ExecutionContext, ModuleLoader, PackagedUnit};

#[test]
fn test_each_load_gets_its_own_context() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("greeter").provider("greeting", "greet"));
    let unit = PackagedUnit::resolve(&path).unwrap();
    let loader = ModuleLoader::new(Arc::new(CapabilityRegistry::new()));

    let a = loader.load(&unit).unwrap();
    let b = loader.load(&unit).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.digest(), b.digest());
    assert_eq!(a.exports(), b.exports());
}

#[test]
fn test_values_from_different_loads_never_compare_equal() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("greeter").provider("greeting", "greet"));
    let unit = PackagedUnit::resolve(&path).unwrap();
    let sandbox = SandboxConfig::default();

    let a = ExecutionContext::load(&unit, &sandbox).unwrap();
    let b = ExecutionContext::load(&unit, &sandbox).unwrap();

    let from_a = a.resolve_symbol("greeting").unwrap();
    let from_b = b.resolve_symbol("greeting").unwrap();
    assert_eq!(from_a.name(), from_b.name());
    assert_ne!(from_a, from_b);
    assert_ne!(from_a.construct("hi"), from_b.construct("hi"));
    assert_eq!(from_a.construct("hi"), from_a.construct("hi"));
}

#[test]
fn test_symbols_cannot_cross_contexts() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("greeter").provider("greeting", "greet"));
    let unit = PackagedUnit::resolve(&path).unwrap();
    let sandbox = SandboxConfig::default();

    let a = ExecutionContext::load(&unit, &sandbox).unwrap();
    let b = ExecutionContext::load(&unit, &sandbox).unwrap();
    let greet = a.resolve_symbol("greet").unwrap();

    assert!(a.call_symbol(&greet, b"").is_ok());
    assert!(b.call_symbol(&greet, b"").is_err());
}

#[test]
fn test_unknown_symbol() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("greeter"));
    let context =
        ExecutionContext::load(&PackagedUnit::resolve(&path).unwrap(), &SandboxConfig::default())
            .unwrap();
    assert!(context.resolve_symbol("greet").is_none());
}

#[test]
fn test_deploying_one_copy_leaves_the_other_loaded() {
    let h = Harness::new();
    let path = h.unit(&UnitBuilder::new("greeter").provider("greeting", "greet"));
    let a = h.runtime.load_component(&path).unwrap();
    let b = h.runtime.load_component(&path).unwrap();

    h.runtime.deploy_by_id(a).unwrap();
    assert_eq!(h.capabilities.provider_count("greeting"), 1);
    assert_eq!(
        h.runtime.state_of(b).unwrap(),
        tessera_runtime::ComponentState::Loaded
    );
}
