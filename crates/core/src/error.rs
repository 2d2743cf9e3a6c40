//! Error taxonomy for compilation and evaluation.
//!
//! Faults raised inside the script runtime (hooks, bindings, host callables)
//! travel through Lua as `mlua::Error::external(SandboxFault)` and are
//! recovered here into a single [`EvaluationError`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::host::HostError;
use crate::marshal::ConversionError;

/// Classification of an evaluation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Timeout,
    StackDepth,
    Security,
    Conversion,
    Runtime,
    /// Raised by the script itself through `error(...)`.
    User,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Timeout => "timeout",
            FaultKind::StackDepth => "stack-depth",
            FaultKind::Security => "security",
            FaultKind::Conversion => "conversion",
            FaultKind::Runtime => "runtime",
            FaultKind::User => "user",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Faults raised by the engine while a script runs.
#[derive(Debug, Clone, Error)]
pub enum SandboxFault {
    #[error("evaluation exceeded the time limit of {limit_secs}s")]
    Timeout { limit_secs: u64, line: Option<u32> },

    #[error("call depth exceeded the limit of {limit}")]
    StackDepth { limit: usize, line: Option<u32> },

    #[error("access to '{type_name}' is not permitted: {reason}")]
    Security { type_name: String, reason: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("{0}")]
    Raised(String),

    #[error("{function}: {source}")]
    Host { function: String, source: HostError },
}

impl SandboxFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            SandboxFault::Timeout { .. } => FaultKind::Timeout,
            SandboxFault::StackDepth { .. } => FaultKind::StackDepth,
            SandboxFault::Security { .. } => FaultKind::Security,
            SandboxFault::Conversion(_) => FaultKind::Conversion,
            SandboxFault::Raised(_) => FaultKind::User,
            SandboxFault::Host { source, .. } => match source {
                HostError::Conversion(_) => FaultKind::Conversion,
                HostError::Evaluation(inner) => inner.kind,
                _ => FaultKind::Runtime,
            },
        }
    }

    /// Line recorded when the fault was raised from the instruction hook.
    pub fn line(&self) -> Option<u32> {
        match self {
            SandboxFault::Timeout { line, .. } | SandboxFault::StackDepth { line, .. } => *line,
            _ => None,
        }
    }

    pub(crate) fn into_lua(self) -> mlua::Error {
        mlua::Error::external(self)
    }
}

/// One entry of the line trail attached to an evaluation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailEntry {
    At(u32),
    CalledFrom(u32),
}

impl fmt::Display for TrailEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailEntry::At(line) => write!(f, "at line {line}"),
            TrailEntry::CalledFrom(line) => write!(f, "called from line {line}"),
        }
    }
}

fn render_trail(trail: &[TrailEntry]) -> String {
    if trail.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = trail.iter().map(ToString::to_string).collect();
    format!(" ({})", parts.join(", "))
}

/// The single error produced by a failed run.
#[derive(Debug, Clone, Error)]
#[error("{cause}{}", render_trail(.trail))]
pub struct EvaluationError {
    pub kind: FaultKind,
    pub cause: String,
    pub trail: Vec<TrailEntry>,
    #[source]
    pub origin: Option<SandboxFault>,
}

impl EvaluationError {
    pub fn new(kind: FaultKind, cause: impl Into<String>) -> Self {
        Self { kind, cause: cause.into(), trail: Vec::new(), origin: None }
    }

    pub fn with_trail(mut self, trail: Vec<TrailEntry>) -> Self {
        self.trail = trail;
        self
    }

    /// Line where the failure happened, when known.
    pub fn line(&self) -> Option<u32> {
        self.trail.iter().find_map(|entry| match entry {
            TrailEntry::At(line) => Some(*line),
            TrailEntry::CalledFrom(_) => None,
        })
    }

    /// Build the evaluation error for a Lua failure in the chunk `chunk`.
    pub(crate) fn from_lua(err: &mlua::Error, chunk: &str) -> Self {
        let text = full_text(err);
        let mut trail = extract_trail(&text, chunk);

        if let Some(fault) = find_fault(err) {
            if trail.is_empty()
                && let Some(line) = fault.line()
            {
                trail.push(TrailEntry::At(line));
            }
            return Self {
                kind: fault.kind(),
                cause: fault.to_string(),
                trail,
                origin: Some(fault.clone()),
            };
        }

        let kind =
            if text.contains("stack overflow") { FaultKind::StackDepth } else { FaultKind::Runtime };
        let cause = match err {
            mlua::Error::MemoryError(_) => "memory limit exceeded".to_string(),
            _ => clean_message(&text, chunk),
        };
        Self { kind, cause, trail, origin: None }
    }
}

impl From<SandboxFault> for EvaluationError {
    fn from(fault: SandboxFault) -> Self {
        let trail = fault.line().map(TrailEntry::At).into_iter().collect();
        Self { kind: fault.kind(), cause: fault.to_string(), trail, origin: Some(fault) }
    }
}

/// A script failed to compile.
#[derive(Debug, Clone, Error)]
#[error("syntax error in {unit}{}: {message}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
pub struct CompileError {
    pub unit: String,
    pub line: Option<u32>,
    pub message: String,
}

impl CompileError {
    pub(crate) fn from_lua(err: &mlua::Error, unit: &str, chunk: &str) -> Self {
        let text = full_text(err);
        let line = extract_trail(&text, chunk).first().map(|entry| match entry {
            TrailEntry::At(l) | TrailEntry::CalledFrom(l) => *l,
        });
        Self { unit: unit.to_string(), line, message: clean_message(&text, chunk) }
    }
}

/// Errors raised while building an engine or a worker.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to initialise script runtime: {0}")]
    Lua(#[from] mlua::Error),

    #[error("'{0}' cannot be registered as a function name")]
    InvalidFunctionName(String),
}

/// Walk callback and context wrappers looking for an engine fault.
pub(crate) fn find_fault(err: &mlua::Error) -> Option<&SandboxFault> {
    match err {
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            find_fault(cause)
        }
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<SandboxFault>(),
        _ => None,
    }
}

fn full_text(err: &mlua::Error) -> String {
    let mut text = String::new();
    collect_text(err, &mut text);
    text
}

/// Messages first, tracebacks after, so the failing line comes first.
fn collect_text(err: &mlua::Error, out: &mut String) {
    match err {
        mlua::Error::CallbackError { cause, traceback } => {
            collect_text(cause, out);
            out.push('\n');
            out.push_str(traceback);
        }
        mlua::Error::WithContext { cause, .. } => collect_text(cause, out),
        mlua::Error::RuntimeError(msg) | mlua::Error::MemoryError(msg) => out.push_str(msg),
        mlua::Error::SyntaxError { message, .. } => out.push_str(message),
        other => out.push_str(&other.to_string()),
    }
}

/// Line numbers referencing `chunk`, in order, with consecutive repeats
/// collapsed. The first is where the failure happened; later ones are
/// callers.
fn extract_trail(text: &str, chunk: &str) -> Vec<TrailEntry> {
    const MAX_TRAIL: usize = 8;

    let Ok(re) = Regex::new(&format!(r"{}:(\d+):", regex::escape(chunk))) else {
        return Vec::new();
    };
    let mut lines: Vec<u32> = Vec::new();
    for caps in re.captures_iter(text) {
        let Some(line) = caps.get(1).and_then(|m| m.as_str().parse().ok()) else {
            continue;
        };
        if lines.last() != Some(&line) {
            lines.push(line);
        }
    }

    lines
        .into_iter()
        .take(MAX_TRAIL)
        .enumerate()
        .map(|(i, line)| if i == 0 { TrailEntry::At(line) } else { TrailEntry::CalledFrom(line) })
        .collect()
}

static LOCATION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:\[string "[^"]*"\]|[^\s:]+(?::[^\s:]+)*?):\d+:\s*"#)
        .expect("valid regex")
});

/// First line of the message with the `chunk:line:` location stripped.
fn clean_message(text: &str, chunk: &str) -> String {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let first = first.strip_prefix("runtime error: ").unwrap_or(first);
    let first = first.strip_prefix("syntax error: ").unwrap_or(first);

    let located = format!("{chunk}:");
    if let Some(rest) = first.strip_prefix(&located) {
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        return rest.trim_start_matches(':').trim().to_string();
    }
    LOCATION_PREFIX.replace(first, "").trim().to_string()
}
