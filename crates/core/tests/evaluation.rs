use std::sync::Arc;
use std::time::{Duration, Instant};

use sandcell_core::config::EngineSettings;
use sandcell_core::{
    Arity, DataSource, FaultKind, HostError, HostValue, RunOutcome, ScopeFrame, ScriptEngine,
    SessionOptions, TrailEntry, VarTable,
};

fn value(outcome: RunOutcome) -> HostValue {
    outcome.into_value().expect("run was suppressed")
}

#[test]
fn scope_variables_and_lexical_scope_are_visible() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let unit = worker.compile("amount * rate").unwrap();

    let frame = ScopeFrame::new().with_scope(VarTable::new().with("rate", 0.5).with("amount", 1i64));
    let scope = VarTable::new().with("amount", 10i64);
    assert_eq!(value(worker.run(&unit, &scope, Some(frame)).unwrap()), HostValue::Float(5.0));
}

#[test]
fn assignments_do_not_leak_between_runs() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let set = worker.compile("leaked = 1\nreturn leaked").unwrap();
    let read = worker.compile("leaked == nil").unwrap();

    assert_eq!(value(worker.run(&set, &VarTable::new(), None).unwrap()), HostValue::Int(1));
    assert_eq!(value(worker.run(&read, &VarTable::new(), None).unwrap()), HostValue::Bool(true));
}

#[test]
fn library_patches_do_not_leak_between_runs() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let floor = worker.compile("math.floor(1.5)").unwrap();
    let patch = worker.compile("math.floor = function() return 999 end").unwrap();

    assert_eq!(value(worker.run(&floor, &VarTable::new(), None).unwrap()), HostValue::Int(1));
    let err = worker.run(&patch, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Runtime);
    assert!(err.cause.contains("read-only"), "{err}");
    assert_eq!(value(worker.run(&floor, &VarTable::new(), None).unwrap()), HostValue::Int(1));
}

#[test]
fn registered_functions_see_the_scope_frame() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();

    engine
        .register_function("CELL_LABEL", Arity::Exact(0), |ctx, _| {
            let cell = ctx.cell().ok_or_else(|| HostError::message("no cell"))?;
            let source = ctx.frame().and_then(|f| f.data_source).map(|d| d.name().to_string());
            Ok(HostValue::Str(format!(
                "{}!R{}C{}",
                source.unwrap_or_default(),
                cell.row,
                cell.col
            )))
        })
        .unwrap();

    let unit = worker.compile("CELL_LABEL() .. '/' .. data_source()").unwrap();
    let frame = ScopeFrame::new().with_data_source(DataSource::new("sales", ())).at_cell(3, 4);
    assert_eq!(
        value(worker.run(&unit, &VarTable::new(), Some(frame)).unwrap()),
        HostValue::Str("sales!R3C4/sales".into())
    );
}

#[test]
fn registered_function_arity_is_enforced() {
    let engine = ScriptEngine::default();
    engine
        .register_function("TWICE", Arity::Exact(1), |_, args| match &args[0] {
            HostValue::Int(i) => Ok(HostValue::Int(i * 2)),
            other => Err(HostError::message(format!("not an integer: {}", other.type_name()))),
        })
        .unwrap();
    let worker = engine.worker().unwrap();

    assert_eq!(value(worker.eval("TWICE(21)", &VarTable::new()).unwrap()), HostValue::Int(42));

    let err = worker.eval("TWICE(1, 2)", &VarTable::new()).unwrap_err();
    assert_eq!(err.kind, FaultKind::Runtime);
    assert!(err.cause.contains("TWICE"), "cause: {}", err.cause);

    let err = worker.eval("TWICE('x')", &VarTable::new()).unwrap_err();
    assert!(err.cause.contains("not an integer"), "cause: {}", err.cause);
}

#[test]
fn nested_evaluation_shares_the_worker() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let inner = worker.compile_named("inner", "x * 2 + cell_row()").unwrap();

    engine
        .register_function("INNER", Arity::Exact(1), move |ctx, args| {
            ctx.evaluate(&inner, &VarTable::new().with("x", args[0].clone()))
        })
        .unwrap();

    let outer = worker.compile_named("outer", "INNER(20) + INNER(1)").unwrap();
    let frame = ScopeFrame::new().at_cell(1, 0);
    assert_eq!(
        value(worker.run(&outer, &VarTable::new(), Some(frame)).unwrap()),
        HostValue::Int(44)
    );
    assert_eq!(worker.scope_depth(), 0);
}

#[test]
fn nested_evaluation_runs_on_the_outer_clock() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let spin = worker.compile_named("spin", "while true do end").unwrap();

    engine
        .register_function("SPIN", Arity::Exact(0), move |ctx, _| ctx.evaluate(&spin, &VarTable::new()))
        .unwrap();

    let options = SessionOptions::from_settings(&engine.settings()).timeout_secs(1);
    let _session = worker.enter_session_with(options);
    let outer = worker.compile("SPIN()").unwrap();

    let started = Instant::now();
    let err = worker.run(&outer, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn swallowed_nested_timeout_does_not_fire_again() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let spin = worker.compile_named("spin", "while true do end").unwrap();

    engine
        .register_function("TRY_SPIN", Arity::Exact(0), move |ctx, _| {
            match ctx.evaluate(&spin, &VarTable::new()) {
                Err(HostError::Evaluation(err)) if err.kind == FaultKind::Timeout => {
                    Ok(HostValue::Int(1))
                }
                other => other,
            }
        })
        .unwrap();

    let options = SessionOptions::from_settings(&engine.settings()).timeout_secs(1);
    let _session = worker.enter_session_with(options);
    let outer = worker.compile("TRY_SPIN() + 1").unwrap();

    let started = Instant::now();
    assert_eq!(value(worker.run(&outer, &VarTable::new(), None).unwrap()), HostValue::Int(2));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn shared_subtables_in_a_result_fail_fast() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let options = SessionOptions::from_settings(&engine.settings()).timeout_secs(1);
    let _session = worker.enter_session_with(options);
    let unit = worker.compile("local t = {} for i = 1, 30 do t = {t, t} end return t").unwrap();

    let started = Instant::now();
    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Conversion);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn deep_recursion_hits_the_depth_limit() {
    let engine = ScriptEngine::new(EngineSettings { max_stack_depth: 50, ..EngineSettings::default() });
    let worker = engine.worker().unwrap();
    let unit = worker
        .compile("local function f(n)\n  return f(n + 1) + 1\nend\nlocal r = f(1)\nreturn r")
        .unwrap();

    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::StackDepth);
    assert!(err.cause.contains("50"));

    let shallow = worker
        .compile("local function f(n)\n  if n == 0 then return 0 end\n  return f(n - 1) + 1\nend\nreturn f(20)")
        .unwrap();
    assert_eq!(value(worker.run(&shallow, &VarTable::new(), None).unwrap()), HostValue::Int(20));
}

#[test]
fn tail_calls_do_not_count_towards_depth() {
    let engine = ScriptEngine::new(EngineSettings { max_stack_depth: 20, ..EngineSettings::default() });
    let worker = engine.worker().unwrap();
    let unit = worker
        .compile("local function loop(n)\n  if n == 0 then return 'done' end\n  return loop(n - 1)\nend\nreturn loop(500)")
        .unwrap();
    assert_eq!(value(worker.run(&unit, &VarTable::new(), None).unwrap()), HostValue::Str("done".into()));
}

#[test]
fn user_errors_carry_a_line_trail() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let unit = worker
        .compile_named(
            "calc",
            "local function check(v)\n  if v < 0 then error('negative input') end\n  return v\nend\nlocal r = check(-1)\nreturn r",
        )
        .unwrap();

    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::User);
    assert_eq!(err.cause, "negative input");
    assert_eq!(err.line(), Some(2));
    assert!(err.trail.contains(&TrailEntry::CalledFrom(5)), "trail: {:?}", err.trail);
    assert!(err.to_string().starts_with("negative input (at line 2"));
}

#[test]
fn runtime_errors_report_their_line() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let unit = worker.compile_named("calc", "local t = nil\nreturn t.x").unwrap();

    let err = worker.run(&unit, &VarTable::new(), None).unwrap_err();
    assert_eq!(err.kind, FaultKind::Runtime);
    assert_eq!(err.line(), Some(2));
    assert!(err.cause.contains("attempt to index a nil value"), "cause: {}", err.cause);
}

#[test]
fn syntax_errors_fail_compilation() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();

    let err = worker.compile_named("broken", "local x = \nreturn x +").unwrap_err();
    assert_eq!(err.unit, "broken");
    assert!(err.line.is_some());
    assert!(err.to_string().starts_with("syntax error in broken"));
    assert_eq!(worker.state(), sandcell_core::ManagerState::Faulted);

    assert!(worker.compile("1").is_ok());
    assert_eq!(worker.state(), sandcell_core::ManagerState::Ready);
}

#[test]
fn sandboxed_globals_are_unreachable() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    for global in ["os", "io", "load", "require", "debug", "pcall", "_G"] {
        let unit = worker.compile(global).unwrap();
        assert_eq!(
            value(worker.run(&unit, &VarTable::new(), None).unwrap()),
            HostValue::Null,
            "{global} should be nil"
        );
    }
}

#[test]
fn host_namespace_surface() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let eval = |src: &str| value(worker.eval(src, &VarTable::new()).unwrap());

    assert_eq!(eval("host.lang.Math.max(2, 7)"), HostValue::Int(7));
    assert_eq!(eval("host.lang.Math.PI > 3"), HostValue::Bool(true));
    assert_eq!(eval("host.nowhere == nil"), HostValue::Bool(true));
    assert_eq!(eval("host.env.locale.Default.language"), HostValue::Str("en".into()));
    assert_eq!(eval("host.env.secrets == nil"), HostValue::Bool(true));
    assert_eq!(eval("tostring(host.lang.Math)"), HostValue::Str("lang.Math".into()));

    let err = worker.eval("host.process.Command('ls')", &VarTable::new()).unwrap_err();
    assert_eq!(err.kind, FaultKind::Security);
}

#[test]
fn workers_on_different_threads_share_one_engine() {
    let engine = ScriptEngine::default();
    engine
        .register_function("OFFSET", Arity::Exact(0), |_, _| Ok(HostValue::Int(100)))
        .unwrap();
    let unit_source = Arc::new("n + OFFSET()".to_string());

    let handles: Vec<_> = (0..4i64)
        .map(|n| {
            let engine = engine.clone();
            let source = Arc::clone(&unit_source);
            std::thread::spawn(move || {
                let worker = engine.worker().unwrap();
                let unit = worker.compile(&source).unwrap();
                let scope = VarTable::new().with("n", n);
                worker.run(&unit, &scope, None).unwrap().into_value()
            })
        })
        .collect();

    let mut results: Vec<HostValue> =
        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
    results.sort_by_key(|v| match v {
        HostValue::Int(i) => *i,
        _ => i64::MAX,
    });
    assert_eq!(
        results,
        vec![HostValue::Int(100), HostValue::Int(101), HostValue::Int(102), HostValue::Int(103)]
    );
}

#[test]
fn compiled_units_run_on_other_workers() {
    let engine = ScriptEngine::default();
    let unit = engine.worker().unwrap().compile("6 * 7").unwrap();

    let handle = {
        let engine = engine.clone();
        let unit = unit.clone();
        std::thread::spawn(move || {
            let worker = engine.worker().unwrap();
            worker.run(&unit, &VarTable::new(), None).unwrap()
        })
    };
    assert_eq!(handle.join().unwrap(), RunOutcome::Value(HostValue::Int(42)));
}

#[test]
fn dropped_units_are_evicted_from_the_worker() {
    let engine = ScriptEngine::default();
    let worker = engine.worker().unwrap();
    let kept = worker.compile("1").unwrap();

    for i in 0..50 {
        let unit = worker.compile(&format!("error('cell {i}')")).unwrap();
        assert!(worker.run(&unit, &VarTable::new(), None).is_err());
    }
    let fresh = worker.compile("2").unwrap();

    assert_eq!(worker.cached_units(), 2);
    assert_eq!(value(worker.run(&kept, &VarTable::new(), None).unwrap()), HostValue::Int(1));
    assert_eq!(value(worker.run(&fresh, &VarTable::new(), None).unwrap()), HostValue::Int(2));
}
