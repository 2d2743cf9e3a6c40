//! Per-thread execution state.
//!
//! A [`Worker`] owns one Lua state plus everything a run needs that must not
//! be shared across threads: the active session, the timeout clock, the
//! scope stack, the wrapper pools and the error ceiling.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mlua::{Function, Lua, MultiValue, Result as LuaResult, Table, Value};

use crate::config::{EngineSettings, WrapPolicy};
use crate::error::{CompileError, EngineError, EvaluationError, FaultKind, SandboxFault};
use crate::functions::{self, CallContext};
use crate::host::{DateKind, HostValue, VarTable};
use crate::marshal::{DateWrapping, FreshWrapping, from_script, to_script};
use crate::namespace::NamespaceHandle;
use crate::scope::{ScopeError, ScopeFrame, ScopeGuard, ScopeStack};
use crate::wrapper::WrapperPools;

use super::ceiling::{CeilingCheck, ErrorCeiling};
use super::engine::ScriptEngine;
use super::sandbox;
use super::session::{Clock, Session, SessionGuard, SessionOptions};
use super::unit::{CompiledUnit, UnitForm, UnitRef};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a worker, observable through [`Worker::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Compiling,
    Ready,
    Running,
    /// The last compile or run failed. The next one starts over.
    Faulted,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Value(HostValue),
    /// Skipped because the unit reached its error ceiling.
    Suppressed,
}

impl RunOutcome {
    pub fn into_value(self) -> Option<HostValue> {
        match self {
            RunOutcome::Value(v) => Some(v),
            RunOutcome::Suppressed => None,
        }
    }
}

pub(crate) struct WorkerState {
    lua: Lua,
    engine: ScriptEngine,
    session: RefCell<Option<Session>>,
    session_nesting: Cell<usize>,
    runs_in_flight: Cell<usize>,
    clock: Cell<Clock>,
    call_depth: Cell<usize>,
    scopes: RefCell<ScopeStack>,
    pools: RefCell<WrapperPools>,
    ceiling: RefCell<ErrorCeiling>,
    functions_generation: Cell<Option<u64>>,
    materialized: RefCell<HashMap<u64, (UnitRef, Function)>>,
    state: Cell<ManagerState>,
    env_meta: Table,
}

impl WorkerState {
    /// The worker that owns `lua`.
    pub(crate) fn from_lua(lua: &Lua) -> LuaResult<Rc<WorkerState>> {
        lua.app_data_ref::<Weak<WorkerState>>()
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| mlua::Error::runtime("no worker is bound to this runtime"))
    }

    pub(crate) fn current_frame(&self) -> Option<ScopeFrame> {
        self.scopes.borrow().current().cloned()
    }

    pub(crate) fn is_restricted(&self) -> bool {
        match self.session.borrow().as_ref() {
            Some(session) => session.options.restricted,
            None => self.engine.settings().restricted,
        }
    }

    pub(crate) fn is_type_visible(&self, name: &str) -> bool {
        self.engine.is_type_visible(name, self.is_restricted())
    }

    fn settings(&self) -> Arc<EngineSettings> {
        match self.session.borrow().as_ref() {
            Some(session) => Arc::clone(&session.settings),
            None => self.engine.settings(),
        }
    }

    fn wrap_policy(&self) -> Option<WrapPolicy> {
        self.session.borrow().as_ref().map(|s| s.options.wrap_policy)
    }

    /// Expose a host value to the script, wrapping dates per session policy.
    pub(crate) fn marshal_out(&self, lua: &Lua, value: HostValue) -> LuaResult<Value> {
        let wrapping: &dyn DateWrapping = match self.wrap_policy() {
            Some(WrapPolicy::Pooled) => &self.pools,
            _ => &FreshWrapping,
        };
        to_script(lua, value, wrapping)
    }

    pub(crate) fn enter_call(&self) -> usize {
        let depth = self.call_depth.get() + 1;
        self.call_depth.set(depth);
        depth
    }

    pub(crate) fn leave_call(&self) {
        self.call_depth.set(self.call_depth.get().saturating_sub(1));
    }

    pub(crate) fn clock_fired(&self, limit: Duration) -> bool {
        let (next, fired) = self.clock.get().tick(limit);
        self.clock.set(next);
        fired
    }

    /// Reset the clock, unless a run is already in flight.
    fn start_clock(&self) {
        if self.runs_in_flight.get() == 0 {
            self.clock.set(Clock::Running(Instant::now()));
        }
    }

    fn enter_session(self: &Rc<Self>, options: Option<SessionOptions>) -> SessionGuard {
        let nesting = self.session_nesting.get();
        if nesting == 0 {
            let settings = self.engine.settings();
            let options = options.unwrap_or_else(|| SessionOptions::from_settings(&settings));
            if options.needs_hook() {
                sandbox::install_hook(
                    &self.lua,
                    Rc::downgrade(self),
                    options,
                    settings.instruction_hook_interval,
                );
            }
            let host = NamespaceHandle::new(self.engine.namespace().root());
            if let Err(err) = self.lua.globals().set("host", host) {
                tracing::error!(error = %err, "failed to bind the host namespace");
            }
            let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session = id, restricted = options.restricted, "session started");
            *self.session.borrow_mut() = Some(Session { id, options, settings });
        }
        self.session_nesting.set(nesting + 1);
        SessionGuard::new(Rc::clone(self))
    }

    pub(crate) fn exit_session(&self) {
        let nesting = self.session_nesting.get().saturating_sub(1);
        self.session_nesting.set(nesting);
        if nesting > 0 {
            return;
        }
        self.lua.remove_hook();
        self.pools.borrow_mut().stop();
        self.clock.set(Clock::Idle);
        if let Some(session) = self.session.borrow_mut().take() {
            tracing::debug!(session = session.id, "session ended");
        }
    }

    /// Install registered functions added since the last top-level run.
    fn sync_functions(&self) -> LuaResult<()> {
        let registry = self.engine.functions();
        let generation = registry.generation();
        if self.functions_generation.get() == Some(generation) {
            return Ok(());
        }
        let globals = self.lua.globals();
        for function in registry.snapshot() {
            let f = Arc::clone(&function);
            let callable = self.lua.create_function(move |lua, args: MultiValue| {
                functions::invoke(lua, &f.name, f.arity, &f.callable, args)
            })?;
            globals.set(function.name.as_str(), callable)?;
        }
        self.functions_generation.set(Some(generation));
        Ok(())
    }

    fn materialize(&self, unit: &CompiledUnit) -> LuaResult<Function> {
        if let Some((_, f)) = self.materialized.borrow().get(&unit.id()) {
            return Ok(f.clone());
        }
        let f = load_chunk(&self.lua, unit.name(), unit.prepared())?;
        self.cache_function(unit, f.clone());
        Ok(f)
    }

    /// Cache `function` for `unit`, evicting entries of dropped units first.
    fn cache_function(&self, unit: &CompiledUnit, function: Function) {
        let mut cache = self.materialized.borrow_mut();
        let dead: Vec<u64> =
            cache.iter().filter(|(_, (r, _))| !r.is_live()).map(|(id, _)| *id).collect();
        if !dead.is_empty() {
            let mut ceiling = self.ceiling.borrow_mut();
            for id in &dead {
                cache.remove(id);
                ceiling.forget(*id);
            }
            tracing::trace!(evicted = dead.len(), "dropped units evicted");
        }
        cache.insert(unit.id(), (unit.downgrade(), function));
    }

    /// Fresh environment for one run: lexical scope first, run variables on
    /// top, everything else read through from the globals.
    fn build_env(&self, scope: &VarTable, lexical: Option<&VarTable>) -> LuaResult<Table> {
        let size = scope.len() + lexical.map_or(0, VarTable::len);
        let env = self.lua.create_table_with_capacity(0, size)?;
        for (name, value) in lexical.into_iter().flat_map(VarTable::iter).chain(scope.iter()) {
            env.raw_set(name, self.marshal_out(&self.lua, value.clone())?)?;
        }
        env.set_metatable(Some(self.env_meta.clone()));
        Ok(env)
    }

    fn execute(
        &self,
        unit: &CompiledUnit,
        scope: &VarTable,
        lexical: Option<&VarTable>,
    ) -> Result<HostValue, EvaluationError> {
        let lua_err = |e: mlua::Error| EvaluationError::from_lua(&e, unit.name());
        let func = self.materialize(unit).map_err(lua_err)?;
        let env = self.build_env(scope, lexical).map_err(lua_err)?;
        let value: Value = func.call(env).map_err(lua_err)?;
        from_script(&value).map_err(|e| SandboxFault::Conversion(e).into())
    }

    /// Run `unit`. Nested calls (from host callables) share the session and
    /// the clock of the outermost run.
    pub(crate) fn run(
        self: &Rc<Self>,
        unit: &CompiledUnit,
        scope: &VarTable,
        frame: Option<ScopeFrame>,
    ) -> Result<RunOutcome, EvaluationError> {
        let limit = self.settings().max_error_count;
        if let CeilingCheck::Suppressed { first } = self.ceiling.borrow_mut().check(unit.id(), limit)
        {
            if first {
                tracing::warn!(
                    unit = unit.name(),
                    limit,
                    "error ceiling exceeded; further runs of this unit are skipped"
                );
            }
            return Ok(RunOutcome::Suppressed);
        }

        let lexical = frame.as_ref().map(|f| Arc::clone(&f.lexical_scope));
        let _scope = frame.map(|f| ScopeGuard::push(&self.scopes, f));
        let _session = self.enter_session(None);

        let outermost = self.runs_in_flight.get() == 0;
        if outermost {
            self.start_clock();
            self.pools.borrow_mut().start();
            self.state.set(ManagerState::Running);
            if let Err(err) = self.sync_functions() {
                self.state.set(ManagerState::Faulted);
                return Err(EvaluationError::new(FaultKind::Runtime, err.to_string()));
            }
        }

        self.runs_in_flight.set(self.runs_in_flight.get() + 1);
        let depth = self.call_depth.get();
        let result = self.execute(unit, scope, lexical.as_deref());
        self.call_depth.set(depth);
        self.runs_in_flight.set(self.runs_in_flight.get() - 1);

        match &result {
            Ok(_) => self.ceiling.borrow_mut().record_success(unit.id()),
            Err(err) => {
                // Security faults always reach the caller, so they never
                // count towards suppression.
                if err.kind != FaultKind::Security {
                    self.ceiling.borrow_mut().record_failure(unit.id());
                }
                tracing::debug!(unit = unit.name(), kind = %err.kind, error = %err, "run failed");
            }
        }
        if outermost {
            self.state.set(if result.is_ok() { ManagerState::Idle } else { ManagerState::Faulted });
        }
        result.map(RunOutcome::Value)
    }
}

fn load_chunk(lua: &Lua, name: &str, prepared: &str) -> LuaResult<Function> {
    lua.load(prepared).set_name(format!("={name}")).into_function()
}

/// Per-thread handle for compiling and running scripts.
///
/// Workers are cheap to create and not `Send`; create one per thread from a
/// shared [`ScriptEngine`].
pub struct Worker {
    state: Rc<WorkerState>,
}

impl Worker {
    pub(crate) fn new(engine: ScriptEngine) -> Result<Self, EngineError> {
        let settings = engine.settings();
        let lua = sandbox::create_runtime(&settings)?;
        let env_meta = sandbox::env_metatable(&lua)?;

        let state = Rc::new(WorkerState {
            lua,
            engine,
            session: RefCell::new(None),
            session_nesting: Cell::new(0),
            runs_in_flight: Cell::new(0),
            clock: Cell::new(Clock::Idle),
            call_depth: Cell::new(0),
            scopes: RefCell::new(ScopeStack::new()),
            pools: RefCell::new(WrapperPools::new()),
            ceiling: RefCell::new(ErrorCeiling::default()),
            functions_generation: Cell::new(None),
            materialized: RefCell::new(HashMap::new()),
            state: Cell::new(ManagerState::Idle),
            env_meta,
        });
        state.lua.set_app_data(Rc::downgrade(&state));
        Ok(Self { state })
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.state.engine
    }

    pub fn state(&self) -> ManagerState {
        self.state.state.get()
    }

    /// Compile `source` under the default unit name.
    pub fn compile(&self, source: &str) -> Result<CompiledUnit, CompileError> {
        self.compile_named("formula", source)
    }

    /// Compile `source`, accepting it as an expression when it parses as one
    /// and as a statement block otherwise.
    pub fn compile_named(&self, name: &str, source: &str) -> Result<CompiledUnit, CompileError> {
        let state = &self.state;
        state.state.set(ManagerState::Compiling);

        let lua = &state.lua;
        let (form, function) =
            match load_chunk(lua, name, &UnitForm::Expression.prepare(source)) {
                Ok(f) => (UnitForm::Expression, f),
                Err(_) => match load_chunk(lua, name, &UnitForm::Statements.prepare(source)) {
                    Ok(f) => (UnitForm::Statements, f),
                    Err(err) => {
                        state.state.set(ManagerState::Faulted);
                        let err = CompileError::from_lua(&err, name, name);
                        tracing::debug!(unit = name, error = %err, "compile failed");
                        return Err(err);
                    }
                },
            };

        let unit = CompiledUnit::new(name, source, form);
        state.cache_function(&unit, function);
        state.state.set(ManagerState::Ready);
        tracing::debug!(unit = name, id = unit.id(), form = ?form, "compiled");
        Ok(unit)
    }

    /// Enter a session with the engine defaults. Re-entering while a session
    /// is active reuses it.
    pub fn enter_session(&self) -> SessionGuard {
        self.state.enter_session(None)
    }

    /// Enter a session with explicit options. Ignored for nested entries.
    pub fn enter_session_with(&self, options: SessionOptions) -> SessionGuard {
        self.state.enter_session(Some(options))
    }

    /// Options of the active session.
    pub fn session(&self) -> Option<SessionOptions> {
        self.state.session.borrow().as_ref().map(|s| s.options)
    }

    pub fn session_id(&self) -> Option<u64> {
        self.state.session.borrow().as_ref().map(|s| s.id)
    }

    /// Reset the timeout baseline. No effect while a run is in flight.
    pub fn start_clock(&self) {
        self.state.start_clock();
    }

    /// When the current clock was started, if it is running.
    pub fn clock_baseline(&self) -> Option<Instant> {
        self.state.clock.get().baseline()
    }

    pub fn run(
        &self,
        unit: &CompiledUnit,
        scope: &VarTable,
        frame: Option<ScopeFrame>,
    ) -> Result<RunOutcome, EvaluationError> {
        WorkerState::run(&self.state, unit, scope, frame)
    }

    /// Compile and run in one step.
    pub fn eval(&self, source: &str, scope: &VarTable) -> Result<RunOutcome, EvaluationError> {
        let unit = self.compile(source).map_err(|e| {
            let err = EvaluationError::new(FaultKind::Runtime, e.message.clone());
            match e.line {
                Some(line) => err.with_trail(vec![crate::error::TrailEntry::At(line)]),
                None => err,
            }
        })?;
        self.run(&unit, scope, None)
    }

    pub fn push_scope(&self, frame: ScopeFrame) {
        self.state.scopes.borrow_mut().push(frame);
    }

    pub fn pop_scope(&self) -> Result<ScopeFrame, ScopeError> {
        self.state.scopes.borrow_mut().pop()
    }

    pub fn current_scope(&self) -> Option<ScopeFrame> {
        self.state.current_frame()
    }

    pub fn scope_depth(&self) -> usize {
        self.state.scopes.borrow().depth()
    }

    /// Visibility of `name` under the active session's restriction mode.
    pub fn is_type_visible(&self, name: &str) -> bool {
        self.state.is_type_visible(name)
    }

    /// Consecutive failures recorded for `unit` on this worker.
    pub fn error_count(&self, unit: &CompiledUnit) -> usize {
        self.state.ceiling.borrow().failures(unit.id())
    }

    /// Units with a Lua function cached on this worker.
    pub fn cached_units(&self) -> usize {
        self.state.materialized.borrow().len()
    }

    /// Wrappers allocated for `kind` in the current session.
    pub fn pooled_wrappers(&self, kind: DateKind) -> usize {
        self.state.pools.borrow().allocated(kind)
    }

    /// Run a host callable as if it were invoked from a script on this
    /// worker.
    pub fn with_context<R>(&self, f: impl FnOnce(&CallContext<'_>) -> R) -> R {
        f(&CallContext::attached(&self.state))
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state.state.get())
            .field("session_nesting", &self.state.session_nesting.get())
            .field("scope_depth", &self.state.scopes.borrow().depth())
            .finish()
    }
}
