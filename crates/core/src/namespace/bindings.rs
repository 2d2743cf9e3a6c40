//! Script-side views of the namespace tree.
//!
//! The `host` global is a [`NamespaceHandle`] on the root node. Indexing it
//! walks the tree one segment at a time, using the restriction mode of the
//! session that is running on the calling worker.

use std::sync::Arc;

use mlua::{Lua, MetaMethod, MultiValue, Result as LuaResult, UserData, UserDataMethods, Value};

use super::{NamespaceNode, Resolution};
use crate::error::SandboxFault;
use crate::functions::{self, Arity};
use crate::host::{HostError, HostType, StaticMember};
use crate::runtime::WorkerState;

/// A package path as seen by scripts.
#[derive(Clone)]
pub struct NamespaceHandle {
    node: Arc<NamespaceNode>,
}

impl NamespaceHandle {
    pub(crate) fn new(node: Arc<NamespaceNode>) -> Self {
        Self { node }
    }

    fn index(&self, lua: &Lua, segment: &str) -> LuaResult<Value> {
        let restricted = WorkerState::from_lua(lua)?.is_restricted();
        match self.node.resolve(segment, restricted) {
            Resolution::Namespace(node) => {
                lua.create_userdata(NamespaceHandle::new(node)).map(Value::UserData)
            }
            Resolution::Type(ty) => lua.create_userdata(TypeHandle(ty)).map(Value::UserData),
            Resolution::Blocked(verdict) => Err(SandboxFault::Security {
                type_name: verdict.type_name,
                reason: verdict.reason.to_string(),
            }
            .into_lua()),
            Resolution::NotFound => Ok(Value::Nil),
        }
    }
}

impl UserData for NamespaceHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| match key {
            Value::String(s) => this.index(lua, &s.to_str()?),
            _ => Ok(Value::Nil),
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(if this.node.path().is_empty() {
                "host".to_string()
            } else {
                format!("host.{}", this.node.path())
            })
        });
    }
}

/// A resolved host type. Static members are reachable by indexing, and
/// calling the handle runs the constructor.
#[derive(Clone)]
pub struct TypeHandle(pub(crate) Arc<HostType>);

impl TypeHandle {
    fn member(&self, lua: &Lua, name: &str) -> LuaResult<Value> {
        match self.0.member(name) {
            Some(StaticMember::Function(f)) => {
                let f = Arc::clone(f);
                let qualified = format!("{}.{}", self.0.name(), name);
                let func = lua.create_function(move |lua, args: MultiValue| {
                    functions::invoke(lua, &qualified, Arity::Variadic, &f, args)
                })?;
                Ok(Value::Function(func))
            }
            Some(StaticMember::Constant(value)) => {
                WorkerState::from_lua(lua)?.marshal_out(lua, value.clone())
            }
            None => Ok(Value::Nil),
        }
    }
}

impl UserData for TypeHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| match key {
            Value::String(s) => this.member(lua, &s.to_str()?),
            _ => Ok(Value::Nil),
        });
        methods.add_meta_method(MetaMethod::Call, |lua, this, args: MultiValue| {
            let name = this.0.name();
            match this.0.constructor() {
                Some(ctor) => functions::invoke(lua, name, Arity::Variadic, ctor, args),
                None => Err(SandboxFault::Host {
                    function: name.to_string(),
                    source: HostError::message("type has no constructor"),
                }
                .into_lua()),
            }
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.name().to_string()));
    }
}
