//! Behavioural tests for crash detection and journal recovery.

use std::cell::RefCell;

use genesis_config::CapabilityLevel;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::journal::OperationStatus;
use crate::lifecycle::Hook;

use super::support::{self, HealthEvent, TestWorld};

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<TestWorld> {
    support::world()
}

#[given("an advanced engine configuration")]
fn given_advanced(world: &RefCell<TestWorld>) {
    world.borrow_mut().configure(|loader| loader.with_level("advanced"));
}

#[given("the reconcile policy is \"{policy}\"")]
fn given_policy(world: &RefCell<TestWorld>, policy: String) {
    world
        .borrow_mut()
        .configure(|loader| loader.with_reconcile_policy(&policy));
}

#[given("recovery resumes every resumable operation")]
fn given_resumer(world: &RefCell<TestWorld>) {
    world.borrow_mut().resume_everything();
}

#[given("the engine has booted")]
fn given_booted(world: &RefCell<TestWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    world.boot();
    match world.boot_error() {
        None => Ok(()),
        Some(error) => Err(format!("boot failed: {error}")),
    }
}

#[given("an operation \"{description}\" is in flight")]
fn given_in_flight(world: &RefCell<TestWorld>, description: String) {
    world.borrow_mut().begin_and_hold(&description, false);
}

#[given("a resumable operation \"{description}\" is in flight")]
fn given_resumable_in_flight(world: &RefCell<TestWorld>, description: String) {
    world.borrow_mut().begin_and_hold(&description, true);
}

#[given("the engine was shut down gracefully")]
fn given_graceful_shutdown(world: &RefCell<TestWorld>) {
    let mut world = world.borrow_mut();
    world.shut_down();
    assert!(world.shutdown_record().is_graceful());
}

#[when("the engine process is killed")]
fn when_killed(world: &RefCell<TestWorld>) {
    world.borrow_mut().crash();
}

#[then("a crash was detected")]
fn then_crash_detected(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    let previous = world
        .engine()
        .previous_shutdown()
        .expect("previous shutdown should be known once started");
    assert!(previous.is_crash(), "previous shutdown: {previous:?}");
    assert!(world.reporter.events().contains(&HealthEvent::CrashDetected));
}

#[then("no crash was detected")]
fn then_no_crash(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    let previous = world
        .engine()
        .previous_shutdown()
        .expect("previous shutdown should be known once started");
    assert!(!previous.is_crash(), "previous shutdown: {previous:?}");
    assert!(!world.reporter.hooks().contains(&Hook::CrashDetected));
}

#[then("recovery resumed {resumed} and failed {failed} operations")]
fn then_recovery_counts(world: &RefCell<TestWorld>, resumed: String, failed: String) -> StepResult {
    let resumed = parse_count(&resumed)?;
    let failed = parse_count(&failed)?;
    let world = world.borrow();
    let report = world
        .engine()
        .recovery_report()
        .ok_or_else(|| "recovery did not run".to_owned())?;
    if report.resumed.len() != resumed || report.failed.len() != failed {
        return Err(format!("unexpected recovery report: {report:?}"));
    }
    let reported = world
        .reporter
        .events()
        .contains(&HealthEvent::RecoveryCompleted(report.clone()));
    if reported {
        Ok(())
    } else {
        Err("recovery completion was not reported".to_owned())
    }
}

#[then("every interrupted operation is resolved in the journal")]
fn then_resolved(world: &RefCell<TestWorld>) -> StepResult {
    let world = world.borrow();
    let state = world
        .engine()
        .journal_state()
        .map_err(|error| error.to_string())?;
    for id in world.operations() {
        let record = state
            .operation(*id)
            .ok_or_else(|| format!("operation {id} missing from the journal"))?;
        if record.status == OperationStatus::InFlight {
            return Err(format!("operation {id} is still in flight"));
        }
    }
    if state.in_flight().is_empty() {
        Ok(())
    } else {
        Err("journal still holds in-flight operations".to_owned())
    }
}

#[then("no recovery ran")]
fn then_no_recovery(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    assert!(world.engine().recovery_report().is_none());
    assert!(
        !world
            .reporter
            .events()
            .iter()
            .any(|event| matches!(event, HealthEvent::RecoveryCompleted(_))),
        "recovery was reported"
    );
}

#[then("the \"{hook}\" hook fired at the \"{level}\" level")]
fn then_hook_fired(world: &RefCell<TestWorld>, hook: String, level: String) -> StepResult {
    let hook = hook
        .parse::<Hook>()
        .map_err(|error| format!("unknown hook '{hook}': {error}"))?;
    let level = level
        .parse::<CapabilityLevel>()
        .map_err(|error| format!("invalid level '{level}': {error}"))?;
    let events = world.borrow().reporter.events();
    if events.contains(&HealthEvent::HookFired(hook, level)) {
        Ok(())
    } else {
        Err(format!("{hook} did not fire at {level}: {events:?}"))
    }
}

#[scenario(path = "tests/features/crash_recovery.feature")]
fn crash_recovery(world: RefCell<TestWorld>) -> Result<(), String> {
    let _ = world;
    Ok(())
}

fn parse_count(raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|error| format!("invalid count '{raw}': {error}"))
}
