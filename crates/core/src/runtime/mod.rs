//! Execution context manager.
//!
//! [`ScriptEngine`] is shared across threads; each thread creates its own
//! [`Worker`] to compile and run [`CompiledUnit`]s under a session.

mod ceiling;
mod engine;
mod sandbox;
mod session;
mod unit;
mod worker;

pub use crate::config::WrapPolicy;
pub use engine::{EngineBuilder, ScriptEngine};
pub use session::{SessionGuard, SessionOptions};
pub use unit::{CompiledUnit, UnitForm};
pub use worker::{ManagerState, RunOutcome, Worker};
pub(crate) use worker::WorkerState;
