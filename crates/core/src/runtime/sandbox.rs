//! Lua state construction, sandboxing and the execution hook.

use std::rc::Weak;

use mlua::{
    DebugEvent, Function, HookTriggers, Lua, LuaOptions, MultiValue, Result as LuaResult, StdLib,
    Table, Value, VmState,
};

use crate::config::EngineSettings;
use crate::error::SandboxFault;

use super::session::SessionOptions;
use super::worker::WorkerState;

/// Globals removed from every runtime. `pcall` and `xpcall` go too, so a
/// script cannot swallow a timeout or depth fault.
const REMOVED_GLOBALS: &[&str] = &[
    "dofile",
    "loadfile",
    "load",
    "require",
    "package",
    "io",
    "os",
    "debug",
    "collectgarbage",
    "rawset",
    "pcall",
    "xpcall",
    "_G",
];

/// Library tables scripts see through read-only proxies.
const LIBRARY_TABLES: &[&str] = &["math", "string", "table", "utf8"];

/// Create a sandboxed Lua state with the restricted standard library.
pub(crate) fn create_runtime(settings: &EngineSettings) -> LuaResult<Lua> {
    let libs = StdLib::TABLE | StdLib::STRING | StdLib::UTF8 | StdLib::MATH;
    let lua = Lua::new_with(libs, LuaOptions::default())?;

    if settings.memory_limit > 0 {
        lua.set_memory_limit(settings.memory_limit)?;
    }

    apply_sandbox(&lua)?;
    freeze_libraries(&lua)?;
    install_builtins(&lua)?;
    Ok(lua)
}

fn apply_sandbox(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.set(*name, Value::Nil)?;
    }
    Ok(())
}

/// Swap each library table for an empty proxy that reads through to it and
/// rejects writes, so no run can patch a function another run calls.
fn freeze_libraries(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    let next: Function = globals.get("next")?;

    for name in LIBRARY_TABLES {
        let Value::Table(library) = globals.get::<Value>(*name)? else {
            continue;
        };
        let meta = lua.create_table()?;
        meta.set("__index", library.clone())?;
        meta.set(
            "__newindex",
            lua.create_function(move |_, _: MultiValue| {
                Err::<(), _>(mlua::Error::runtime(format!("library '{name}' is read-only")))
            })?,
        )?;
        let next = next.clone();
        meta.set(
            "__pairs",
            lua.create_function(move |_, _: Value| {
                Ok((next.clone(), library.clone(), Value::Nil))
            })?,
        )?;
        meta.set("__metatable", false)?;

        let proxy = lua.create_table()?;
        proxy.set_metatable(Some(meta));
        globals.set(*name, proxy)?;
    }

    // String values still index the real library through their metatable.
    let string_meta: Table = lua.load("return getmetatable('')").eval()?;
    string_meta.set("__metatable", false)?;
    Ok(())
}

fn install_builtins(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    globals.set(
        "error",
        lua.create_function(|lua, (message, _level): (Value, Option<i64>)| {
            let text = describe(lua, message)?;
            Err::<(), _>(SandboxFault::Raised(text).into_lua())
        })?,
    )?;

    globals.set(
        "print",
        lua.create_function(|lua, args: MultiValue| {
            let parts = args.into_iter().map(|v| describe(lua, v)).collect::<LuaResult<Vec<_>>>()?;
            tracing::info!(target: "sandcell::script", "{}", parts.join("\t"));
            Ok(())
        })?,
    )?;

    globals.set(
        "cell_row",
        lua.create_function(|lua, ()| {
            let frame = WorkerState::from_lua(lua)?.current_frame();
            Ok(frame.and_then(|f| f.cell).map(|c| c.row))
        })?,
    )?;
    globals.set(
        "cell_col",
        lua.create_function(|lua, ()| {
            let frame = WorkerState::from_lua(lua)?.current_frame();
            Ok(frame.and_then(|f| f.cell).map(|c| c.col))
        })?,
    )?;
    globals.set(
        "data_source",
        lua.create_function(|lua, ()| {
            let frame = WorkerState::from_lua(lua)?.current_frame();
            Ok(frame.and_then(|f| f.data_source).map(|d| d.name().to_string()))
        })?,
    )?;

    Ok(())
}

/// `tostring` semantics, metamethods included.
fn describe(lua: &Lua, value: Value) -> LuaResult<String> {
    if let Value::String(s) = &value {
        return Ok(s.to_string_lossy());
    }
    let tostring: Function = lua.globals().get("tostring")?;
    tostring.call(value)
}

/// Metatable for per-run environments: reads fall through to the globals
/// and scripts cannot replace it.
pub(crate) fn env_metatable(lua: &Lua) -> LuaResult<Table> {
    let meta = lua.create_table()?;
    meta.set("__index", lua.globals())?;
    meta.set("__metatable", false)?;
    Ok(meta)
}

/// Install the instruction and call hook enforcing the session limits.
pub(crate) fn install_hook(
    lua: &Lua,
    state: Weak<WorkerState>,
    options: SessionOptions,
    interval: u32,
) {
    let timeout = options.timeout();
    let max_depth = options.max_stack_depth;

    lua.set_hook(
        HookTriggers::new().on_calls().on_returns().every_nth_instruction(interval),
        move |_lua, debug| {
            let Some(state) = state.upgrade() else {
                return Ok(VmState::Continue);
            };
            let line = u32::try_from(debug.curr_line()).ok().filter(|l| *l > 0);

            match debug.event() {
                DebugEvent::Call => {
                    let depth = state.enter_call();
                    if max_depth > 0 && depth > max_depth {
                        return Err(SandboxFault::StackDepth { limit: max_depth, line }.into_lua());
                    }
                }
                DebugEvent::Ret => state.leave_call(),
                _ => {}
            }

            if let Some(limit) = timeout
                && state.clock_fired(limit)
            {
                return Err(
                    SandboxFault::Timeout { limit_secs: limit.as_secs(), line }.into_lua()
                );
            }
            Ok(VmState::Continue)
        },
    );
}
