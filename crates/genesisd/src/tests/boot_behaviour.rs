//! Behavioural tests for the pre-boot gate and capability construction.

use std::cell::RefCell;

use genesis_config::{CapabilityLevel, ServiceKind};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::bootstrap::ErrorCategory;
use crate::registry::{AbsentReason, Capability, CapabilityKind};

use super::support::{self, HealthEvent, TestWorld};

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<TestWorld> {
    support::world()
}

#[given("a baseline engine configuration")]
fn given_baseline(world: &RefCell<TestWorld>) {
    world.borrow_mut().configure(|loader| loader.with_level("baseline"));
}

#[given("the capability level is set to \"{level}\"")]
fn given_level(world: &RefCell<TestWorld>, level: String) {
    world.borrow_mut().configure(|loader| loader.with_level(&level));
}

#[given("the \"{service}\" service is unreachable")]
fn given_unreachable(world: &RefCell<TestWorld>, service: String) {
    world.borrow().connector.fail(&service, "connection refused");
}

#[given("an optional \"{kind}\" service named \"{name}\"")]
fn given_optional(world: &RefCell<TestWorld>, kind: String, name: String) -> StepResult {
    let kind = kind
        .parse::<ServiceKind>()
        .map_err(|error| format!("invalid service kind '{kind}': {error}"))?;
    world
        .borrow_mut()
        .configure(|loader| loader.with_optional(&name, kind));
    Ok(())
}

#[given("the \"{node}\" capability fails to construct")]
fn given_construction_failure(world: &RefCell<TestWorld>, node: String) -> StepResult {
    let node = parse_capability(&node)?;
    world.borrow_mut().fail_construction_of(node);
    Ok(())
}

#[given("a configuration loader that fails")]
fn given_failing_loader(world: &RefCell<TestWorld>) {
    world.borrow_mut().use_failing_loader();
}

#[when("the engine boots")]
fn when_engine_boots(world: &RefCell<TestWorld>) {
    world.borrow_mut().boot();
}

#[then("the engine is ready")]
fn then_engine_ready(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    assert!(
        world.boot_error().is_none(),
        "boot error: {:?}",
        world.boot_error()
    );
    assert!(world.engine().readiness().is_ready(), "readiness not raised");
    assert!(world.reporter.events().contains(&HealthEvent::Ready));
}

#[then("the \"{node}\" capability is present")]
fn then_capability_present(world: &RefCell<TestWorld>, node: String) -> StepResult {
    let kind = parse_capability(&node)?;
    let capability = world.borrow().engine().capability(kind);
    let handle = capability.require().map_err(|error| error.to_string())?;
    handle
        .invoke(b"ping")
        .map_err(|error| format!("{node} handle is unusable: {error}"))?;
    Ok(())
}

#[then("the \"{node}\" capability is reported absent")]
fn then_capability_absent(world: &RefCell<TestWorld>, node: String) -> StepResult {
    let kind = parse_capability(&node)?;
    match world.borrow().engine().capability(kind) {
        Capability::Absent { .. } => Ok(()),
        Capability::Present(handle) => Err(format!("expected {node} to be absent: {handle:?}")),
    }
}

#[then("the \"{node}\" capability is absent because \"{service}\" failed its probe")]
fn then_capability_absent_after_probe(
    world: &RefCell<TestWorld>,
    node: String,
    service: String,
) -> StepResult {
    let kind = parse_capability(&node)?;
    match world.borrow().engine().capability(kind) {
        Capability::Absent {
            reason: AbsentReason::ProbeFailed { service: failed, .. },
            ..
        } if failed == service => Ok(()),
        other => Err(format!("unexpected capability state: {other:?}")),
    }
}

#[then("boot fails with \"{message}\"")]
fn then_boot_fails_with(world: &RefCell<TestWorld>, message: String) -> StepResult {
    let world = world.borrow();
    let error = world
        .boot_error()
        .ok_or_else(|| "boot succeeded unexpectedly".to_owned())?;
    if error.to_string() != message {
        return Err(format!("unexpected diagnostic: {error}"));
    }
    let reported = world
        .reporter
        .events()
        .contains(&HealthEvent::BootFailed(message));
    if reported {
        Ok(())
    } else {
        Err("boot failure was not reported".to_owned())
    }
}

#[then("boot fails in the \"{category}\" category")]
fn then_boot_fails_in_category(world: &RefCell<TestWorld>, category: String) -> StepResult {
    let expected = match category.as_str() {
        "configuration" => ErrorCategory::Configuration,
        "connectivity" => ErrorCategory::Connectivity,
        "construction" => ErrorCategory::Construction,
        "replay" => ErrorCategory::Replay,
        other => return Err(format!("unknown category '{other}'")),
    };
    let world = world.borrow();
    let error = world
        .boot_error()
        .ok_or_else(|| "boot succeeded unexpectedly".to_owned())?;
    if error.category() == expected {
        Ok(())
    } else {
        Err(format!("unexpected category for {error}"))
    }
}

#[then("no capability was constructed")]
fn then_nothing_constructed(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, HealthEvent::Constructed(_))),
        "capabilities were constructed: {events:?}"
    );
}

#[then("every opened connection was closed")]
fn then_connections_closed(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    let mut opened = world.connector.opened();
    let mut closed = world.connector.closed();
    opened.sort();
    closed.sort();
    assert!(!opened.is_empty(), "no connection was opened");
    assert_eq!(opened, closed);
}

#[then("the engine runs at the \"{level}\" capability level")]
fn then_engine_level(world: &RefCell<TestWorld>, level: String) -> StepResult {
    let expected = level
        .parse::<CapabilityLevel>()
        .map_err(|error| format!("invalid level '{level}': {error}"))?;
    let actual = world.borrow().engine().config().capability_level();
    if actual == expected {
        Ok(())
    } else {
        Err(format!("engine runs at {actual}"))
    }
}

#[then("a capability level fallback from \"{raw}\" was reported")]
fn then_fallback_reported(world: &RefCell<TestWorld>, raw: String) {
    assert!(
        world
            .borrow()
            .reporter
            .events()
            .contains(&HealthEvent::LevelFallback(raw)),
        "fallback event missing"
    );
}

#[scenario(path = "tests/features/boot_gate.feature")]
fn boot_gate(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

fn parse_capability(name: &str) -> Result<CapabilityKind, String> {
    name.parse::<CapabilityKind>()
        .map_err(|error| format!("invalid capability '{name}': {error}"))
}
