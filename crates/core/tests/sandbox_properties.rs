use std::time::Duration;

use rstest::rstest;
use sandcell_core::config::EngineSettings;
use sandcell_core::scope::ScopeError;
use sandcell_core::{
    FaultKind, HostType, HostValue, RunOutcome, ScopeFrame, ScriptEngine, SessionOptions, VarTable,
};

fn engine_with(settings: EngineSettings) -> ScriptEngine {
    ScriptEngine::builder()
        .settings(settings)
        .register_type(
            HostType::new("vendor.tools.Widget")
                .with_function("size", |_, _| Ok(HostValue::Int(3))),
        )
        .build()
}

#[rstest]
#[case("vendor.tools.Widget")]
#[case("com.example.Plugin")]
#[case("Unqualified")]
#[case("lang.reflect.Method")]
#[case("util.concurrent.Executor")]
#[case("")]
fn unknown_types_are_invisible_when_restricted(#[case] name: &str) {
    let engine = ScriptEngine::default();
    assert!(!engine.is_type_visible(name, true));
    assert!(!engine.gatekeeper().is_visible(name));
}

#[test]
fn restriction_propagates_into_unlisted_packages() {
    let engine = engine_with(EngineSettings::default());
    let worker = engine.worker().unwrap();
    let unit = worker.compile("host.vendor.tools.Widget.size()").unwrap();

    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Security);

    let opened = engine_with(EngineSettings {
        allow_packages: vec!["vendor".to_string()],
        ..EngineSettings::default()
    });
    let worker = opened.worker().unwrap();
    let unit = worker.compile("host.vendor.tools.Widget.size()").unwrap();
    assert_eq!(
        worker.run(&unit, &VarTable::new(), None).unwrap(),
        RunOutcome::Value(HostValue::Int(3))
    );
}

#[test]
fn restricted_and_unrestricted_lookups_do_not_share_results() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let unit = worker.compile("host.lang.System ~= nil").unwrap();

    {
        let open = SessionOptions::from_settings(&engine.settings()).restricted(false);
        let _session = worker.enter_session_with(open);
        assert!(worker.is_type_visible("lang.System"));
        assert_eq!(
            worker.run(&unit, &VarTable::new(), None).unwrap(),
            RunOutcome::Value(HostValue::Bool(true))
        );
    }

    assert!(!worker.is_type_visible("lang.System"));
    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Security);
}

#[test]
fn runs_within_the_limit_never_time_out() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let unit = worker
        .compile("local s = 0\nfor i = 1, 100000 do s = s + i end\nreturn s")
        .unwrap();

    let options = SessionOptions::from_settings(&engine.settings()).timeout_secs(1);
    let _session = worker.enter_session_with(options);
    for _ in 0..5 {
        assert_eq!(
            worker.run(&unit, &VarTable::new(), None).unwrap(),
            RunOutcome::Value(HostValue::Int(5_000_050_000))
        );
    }
}

#[test]
fn timeout_fires_before_a_value_is_returned() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let unit = worker
        .compile("local s = 0\nwhile true do s = s + 1 end\nreturn s")
        .unwrap();

    let options = SessionOptions::from_settings(&engine.settings()).timeout_secs(1);
    let _session = worker.enter_session_with(options);
    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Timeout);

    // The next top-level run starts a fresh clock.
    let quick = worker.compile("40 + 2").unwrap();
    assert_eq!(
        worker.run(&quick, &VarTable::new(), None).unwrap(),
        RunOutcome::Value(HostValue::Int(42))
    );
}

#[test]
fn reentering_a_session_keeps_it_and_its_clock() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    assert!(worker.session().is_none());

    let outer = worker.enter_session();
    worker.start_clock();
    let id = worker.session_id();
    let baseline = worker.clock_baseline();
    assert!(id.is_some() && baseline.is_some());

    std::thread::sleep(Duration::from_millis(5));
    {
        let _inner = worker.enter_session_with(
            SessionOptions::from_settings(&engine.settings()).restricted(false),
        );
        assert_eq!(worker.session_id(), id);
        assert_eq!(worker.clock_baseline(), baseline);
        assert_eq!(worker.session().map(|s| s.restricted), Some(true));
    }

    assert_eq!(worker.session_id(), id);
    drop(outer);
    assert!(worker.session().is_none());
    assert!(worker.clock_baseline().is_none());
}

#[test]
fn scope_stack_is_balanced_around_runs() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    assert_eq!(worker.pop_scope().unwrap_err(), ScopeError::Empty);

    worker.push_scope(ScopeFrame::new().at_cell(1, 1));
    let before = worker.current_scope().and_then(|f| f.cell);

    let unit = worker.compile("cell_row() * 10 + cell_col()").unwrap();
    let frame = ScopeFrame::new().at_cell(4, 2);
    assert_eq!(
        worker.run(&unit, &VarTable::new(), Some(frame)).unwrap(),
        RunOutcome::Value(HostValue::Int(42))
    );

    let failing = worker.compile("error('boom')").unwrap();
    let frame = ScopeFrame::new().at_cell(9, 9);
    assert!(worker.run(&failing, &VarTable::new(), Some(frame)).is_err());

    assert_eq!(worker.current_scope().and_then(|f| f.cell), before);
    assert_eq!(worker.scope_depth(), 1);
    assert!(worker.pop_scope().is_ok());
    assert_eq!(worker.pop_scope().unwrap_err(), ScopeError::Empty);
}

#[test]
fn error_ceiling_suppresses_after_k_failures() {
    let engine = ScriptEngine::new(EngineSettings { max_error_count: 3, ..EngineSettings::default() });
    let worker = engine.worker().unwrap();
    let unit = worker.compile("error('always fails')").unwrap();

    for _ in 0..3 {
        let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
        assert_eq!(err.kind, FaultKind::User);
    }
    assert_eq!(worker.error_count(&unit), 3);

    for _ in 0..3 {
        assert_eq!(worker.run(&unit, &VarTable::new(), None).unwrap(), RunOutcome::Suppressed);
    }
    assert_eq!(worker.error_count(&unit), 3);

    // Other units are unaffected.
    let other = worker.compile("1").unwrap();
    assert_eq!(
        worker.run(&other, &VarTable::new(), None).unwrap(),
        RunOutcome::Value(HostValue::Int(1))
    );
}

#[test]
fn success_resets_the_error_count() {
    let engine = ScriptEngine::new(EngineSettings { max_error_count: 2, ..EngineSettings::default() });
    let worker = engine.worker().unwrap();
    let unit = worker.compile("if x then error('flagged') end\nreturn 1").unwrap();
    let failing = VarTable::new().with("x", true);

    assert!(worker.run(&unit, &failing, None).is_err());
    assert!(worker.run(&unit, &VarTable::new(), None).is_ok());
    assert_eq!(worker.error_count(&unit), 0);
    assert!(worker.run(&unit, &failing, None).is_err());
    assert!(worker.run(&unit, &failing, None).is_err());
    assert_eq!(worker.run(&unit, &failing, None).unwrap(), RunOutcome::Suppressed);
}

#[test]
fn security_faults_are_never_suppressed() {
    let engine = ScriptEngine::new(EngineSettings { max_error_count: 3, ..EngineSettings::default() });
    let worker = engine.worker().unwrap();
    let unit = worker.compile("host.lang.System.currentTimeMillis()").unwrap();

    for _ in 0..5 {
        let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
        assert_eq!(err.kind, FaultKind::Security);
    }
    assert_eq!(worker.error_count(&unit), 0);
}
