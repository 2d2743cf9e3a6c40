//! `sandcell eval`: compile and run one script.

use std::path::Path;

use sandcell_core::config::ConfigLoader;
use sandcell_core::{HostValue, RunOutcome, ScopeFrame, ScriptEngine, SessionOptions, VarTable};

use super::output::{ErrorOutput, is_limit, print_error, print_value};
use crate::EvalArgs;

pub fn run(config: Option<&Path>, args: &EvalArgs) {
    let rc = match ConfigLoader::load_or_default(config) {
        Ok(rc) => rc,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    };
    crate::logging::init(&rc);

    let scope = match build_scope(&args.vars) {
        Ok(scope) => scope,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    let frame = match args.cell.as_deref().map(parse_cell).transpose() {
        Ok(frame) => frame,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let mut options = SessionOptions::from_settings(&rc.settings);
    if args.unrestricted {
        options = options.restricted(false);
    }
    if let Some(secs) = args.timeout {
        options = options.timeout_secs(secs);
    }

    let engine = ScriptEngine::new(rc.settings);
    let worker = match engine.worker() {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    let unit = match worker.compile_named("eval", &args.source) {
        Ok(unit) => unit,
        Err(e) => {
            print_error(&ErrorOutput::syntax(e.to_string(), e.line), args.json);
            std::process::exit(1);
        }
    };

    let _session = worker.enter_session_with(options);
    tracing::debug!(restricted = options.restricted, timeout = options.timeout_secs, "evaluating");

    match worker.run(&unit, &scope, frame) {
        Ok(RunOutcome::Value(value)) => print_value(&value, args.json),
        Ok(RunOutcome::Suppressed) => print_value(&HostValue::Null, args.json),
        Err(err) => {
            if is_limit(err.kind) {
                tracing::warn!(kind = %err.kind, "evaluation stopped by a limit");
            }
            print_error(&ErrorOutput::from(&err), args.json);
            std::process::exit(1);
        }
    }
}

fn build_scope(vars: &[String]) -> Result<VarTable, String> {
    let mut scope = VarTable::new();
    for raw in vars {
        let (name, value) = parse_var(raw)?;
        scope.insert(name, value);
    }
    Ok(scope)
}

/// Split `name=value` and type the value: integer, number, boolean, else string.
fn parse_var(raw: &str) -> Result<(String, HostValue), String> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(format!("--var expects name=value, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("--var has an empty name in '{raw}'"));
    }

    let typed = if let Ok(i) = value.parse::<i64>() {
        HostValue::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        HostValue::Float(f)
    } else {
        match value {
            "true" => HostValue::Bool(true),
            "false" => HostValue::Bool(false),
            _ => HostValue::Str(value.to_string()),
        }
    };
    Ok((name.to_string(), typed))
}

fn parse_cell(raw: &str) -> Result<ScopeFrame, String> {
    let parsed = raw
        .split_once(',')
        .and_then(|(r, c)| Some((r.trim().parse().ok()?, c.trim().parse().ok()?)));
    match parsed {
        Some((row, col)) => Ok(ScopeFrame::new().at_cell(row, col)),
        None => Err(format!("--cell expects row,col, got '{raw}'")),
    }
}
