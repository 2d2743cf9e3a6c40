//! Subscriber set-up from the `[logging]` config section.
//!
//! `level` drives stderr. When `file` is set, a second layer writes to it
//! at `file_level` (falling back to `level`). Output of the script-side
//! `print` builtin (target `sandcell::script`) always reaches the file so a
//! formula's diagnostics survive a quiet terminal.

use sandcell_core::config::{LoggingConfig, ResolvedConfig};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{Directive, EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const SCRIPT_TARGET: &str = "sandcell::script";

static FILE_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

pub fn init(cfg: &ResolvedConfig) {
    let logging = &cfg.logging;
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(filter(stderr_level(logging), None));

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let file_layer = logging.file.as_deref().and_then(open_log).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter(file_level(logging), Some(LevelFilter::INFO)))
    });

    let _ = registry.with(file_layer).try_init();
}

/// Flush the file writer. Call before a normal exit.
pub fn shutdown() {
    if let Ok(mut guard) = FILE_GUARD.lock() {
        guard.take();
    }
}

fn stderr_level(logging: &LoggingConfig) -> LevelFilter {
    parse_level(&logging.level).unwrap_or(LevelFilter::INFO)
}

fn file_level(logging: &LoggingConfig) -> LevelFilter {
    logging
        .file_level
        .as_deref()
        .and_then(parse_level)
        .unwrap_or_else(|| stderr_level(logging))
}

/// `RUST_LOG` refines the configured level. `script` lifts the floor for
/// script output.
fn filter(level: LevelFilter, script: Option<LevelFilter>) -> EnvFilter {
    let mut filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    if let Some(script_level) = script.filter(|s| *s > level) {
        if let Ok(directive) = format!("{SCRIPT_TARGET}={script_level}").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// An unusable log file degrades to stderr-only logging.
fn open_log(path: &Path) -> Option<NonBlocking> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match File::create(path) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            if let Ok(mut slot) = FILE_GUARD.lock() {
                *slot = Some(guard);
            }
            Some(writer)
        }
        Err(e) => {
            eprintln!("warning: cannot open log file {}: {e}", path.display());
            None
        }
    }
}

/// Level names are case-insensitive; `off` disables a layer.
fn parse_level(s: &str) -> Option<LevelFilter> {
    s.trim().parse().ok()
}
