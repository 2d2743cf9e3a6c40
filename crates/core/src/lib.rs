#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

//! Sandboxed execution of formula scripts.
//!
//! Scripts are Lua expressions or statement blocks evaluated against host
//! data. The engine decides which host types a script may reach, converts
//! values in both directions and bounds every run in time and call depth.

pub mod config;
pub mod error;
pub mod functions;
pub mod host;
pub mod marshal;
pub mod namespace;
pub mod runtime;
pub mod scope;
pub mod security;
pub mod wrapper;

pub use error::{CompileError, EngineError, EvaluationError, FaultKind, SandboxFault, TrailEntry};
pub use functions::{Arity, CallContext};
pub use host::{HostError, HostType, HostValue, VarTable};
pub use runtime::{
    CompiledUnit, EngineBuilder, ManagerState, RunOutcome, ScriptEngine, SessionGuard,
    SessionOptions, Worker, WrapPolicy,
};
pub use scope::{CellLocation, DataSource, ScopeFrame};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// One-line build description used by `sandcell doctor`.
pub fn build_info() -> String {
    format!("sandcell-core v{} | lua 5.4 on {}", version(), std::env::consts::OS)
}
