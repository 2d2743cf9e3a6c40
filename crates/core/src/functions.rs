//! Host functions callable from scripts.
//!
//! The formula library registers its functions here in bulk; each worker
//! installs the current set into its globals before a top-level run.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use mlua::{Lua, MultiValue, Result as LuaResult, Value};

use crate::error::SandboxFault;
use crate::host::{HostError, HostFn, HostValue, VarTable};
use crate::marshal::from_script;
use crate::runtime::{CompiledUnit, RunOutcome, WorkerState};
use crate::scope::{CellLocation, ScopeFrame};

/// Number of arguments a registered function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    Variadic,
}

impl Arity {
    pub fn check(self, actual: usize) -> Result<(), HostError> {
        let (ok, expected) = match self {
            Arity::Exact(n) => (actual == n, n.to_string()),
            Arity::Range(min, max) => (actual >= min && actual <= max, format!("{min} to {max}")),
            Arity::Variadic => (true, String::new()),
        };
        if ok { Ok(()) } else { Err(HostError::Arity { expected, actual }) }
    }
}

pub(crate) struct RegisteredFunction {
    pub(crate) name: String,
    pub(crate) arity: Arity,
    pub(crate) callable: HostFn,
}

/// Engine-wide set of registered functions. The generation counter lets
/// workers notice new registrations without locking on every run.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    functions: RwLock<BTreeMap<String, Arc<RegisteredFunction>>>,
    generation: AtomicU64,
}

impl FunctionRegistry {
    pub(crate) fn register<F>(&self, name: &str, arity: Arity, callable: F)
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> Result<HostValue, HostError>
            + Send
            + Sync
            + 'static,
    {
        let function =
            RegisteredFunction { name: name.to_string(), arity, callable: Arc::new(callable) };
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(function));
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<RegisteredFunction>> {
        self.functions.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.functions.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }
}

/// What a host callable can see of the evaluation that invoked it.
pub struct CallContext<'a> {
    state: Option<&'a Rc<WorkerState>>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn attached(state: &'a Rc<WorkerState>) -> Self {
        Self { state: Some(state) }
    }

    /// A context with no worker behind it, for calling host functions
    /// directly.
    pub fn detached() -> Self {
        Self { state: None }
    }

    /// The innermost scope frame, if any was pushed.
    pub fn frame(&self) -> Option<ScopeFrame> {
        self.state.and_then(|s| s.current_frame())
    }

    pub fn cell(&self) -> Option<CellLocation> {
        self.frame().and_then(|f| f.cell)
    }

    pub fn is_type_visible(&self, name: &str) -> bool {
        self.state.is_some_and(|s| s.is_type_visible(name))
    }

    /// Run another unit on the same worker, sharing the caller's session
    /// and clock. A suppressed run yields `Null`.
    pub fn evaluate(&self, unit: &CompiledUnit, scope: &VarTable) -> Result<HostValue, HostError> {
        let state = self
            .state
            .ok_or_else(|| HostError::message("nested evaluation needs an active worker"))?;
        match WorkerState::run(state, unit, scope, None) {
            Ok(RunOutcome::Value(value)) => Ok(value),
            Ok(RunOutcome::Suppressed) => Ok(HostValue::Null),
            Err(err) => Err(HostError::Evaluation(Box::new(err))),
        }
    }
}

/// Call a host function from script space: unmarshal the arguments, run it
/// with a context bound to the calling worker and marshal the result back.
pub(crate) fn invoke(
    lua: &Lua,
    name: &str,
    arity: Arity,
    callable: &HostFn,
    args: MultiValue,
) -> LuaResult<Value> {
    let fault = |source: HostError| SandboxFault::Host { function: name.to_string(), source };

    arity.check(args.len()).map_err(|e| fault(e).into_lua())?;
    let host_args = args
        .iter()
        .map(from_script)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SandboxFault::Conversion(e).into_lua())?;

    let state = WorkerState::from_lua(lua)?;
    let result = callable(&CallContext::attached(&state), &host_args).map_err(|e| fault(e).into_lua())?;
    state.marshal_out(lua, result)
}
