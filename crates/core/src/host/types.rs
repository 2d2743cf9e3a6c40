//! Host type descriptors and the registry that forms the underlying
//! (ungated) host type system.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::value::HostValue;
use crate::error::EvaluationError;
use crate::functions::CallContext;
use crate::marshal::ConversionError;

/// Signature shared by constructors, static members and registered
/// formula functions.
pub type HostFn =
    Arc<dyn Fn(&CallContext<'_>, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync>;

/// Errors raised by host callables.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("{0}")]
    Message(String),

    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: String, actual: usize },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// A nested evaluation started from inside a host callable failed.
    #[error(transparent)]
    Evaluation(#[from] Box<EvaluationError>),
}

impl HostError {
    pub fn message(msg: impl Into<String>) -> Self {
        HostError::Message(msg.into())
    }
}

/// A static member exposed on a host type.
#[derive(Clone)]
pub enum StaticMember {
    Function(HostFn),
    Constant(HostValue),
}

impl fmt::Debug for StaticMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticMember::Function(_) => write!(f, "Function(..)"),
            StaticMember::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
        }
    }
}

/// A host type a script may reference by its fully-qualified dotted name.
pub struct HostType {
    name: String,
    constructor: Option<HostFn>,
    statics: HashMap<String, StaticMember>,
}

impl HostType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), constructor: None, statics: HashMap::new() }
    }

    pub fn with_constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> Result<HostValue, HostError>
            + Send
            + Sync
            + 'static,
    {
        self.constructor = Some(Arc::new(f));
        self
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> Result<HostValue, HostError>
            + Send
            + Sync
            + 'static,
    {
        self.statics.insert(name.to_string(), StaticMember::Function(Arc::new(f)));
        self
    }

    pub fn with_constant(mut self, name: &str, value: HostValue) -> Self {
        self.statics.insert(name.to_string(), StaticMember::Constant(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last path segment.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn constructor(&self) -> Option<&HostFn> {
        self.constructor.as_ref()
    }

    pub fn member(&self, name: &str) -> Option<&StaticMember> {
        self.statics.get(name)
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut members: Vec<&String> = self.statics.keys().collect();
        members.sort();
        f.debug_struct("HostType")
            .field("name", &self.name)
            .field("constructible", &self.constructor.is_some())
            .field("members", &members)
            .finish()
    }
}

/// What a fully-qualified path denotes in the host type system.
#[derive(Debug, Clone)]
pub enum TypeLookup {
    Type(Arc<HostType>),
    Package,
    Missing,
}

/// Registry of every host type known to the engine, regardless of policy.
#[derive(Debug, Default)]
pub struct HostTypeRegistry {
    types: BTreeMap<String, Arc<HostType>>,
}

impl HostTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in catalogue.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::catalogue::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, ty: HostType) {
        self.types.insert(ty.name().to_string(), Arc::new(ty));
    }

    pub fn get(&self, name: &str) -> Option<Arc<HostType>> {
        self.types.get(name).cloned()
    }

    /// True if some registered type lives under `package`.
    pub fn is_package(&self, package: &str) -> bool {
        let prefix = format!("{package}.");
        self.types
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
    }

    pub fn lookup(&self, path: &str) -> TypeLookup {
        if let Some(ty) = self.get(path) {
            TypeLookup::Type(ty)
        } else if self.is_package(path) {
            TypeLookup::Package
        } else {
            TypeLookup::Missing
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
