//! The shared, thread-safe half of the runtime.

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::functions::{Arity, CallContext, FunctionRegistry};
use crate::host::{HostError, HostType, HostTypeRegistry, HostValue};
use crate::namespace::NamespaceTree;
use crate::security::Gatekeeper;

use super::worker::Worker;

/// Globals a registered function may not shadow.
const RESERVED_NAMES: &[&str] = &[
    "host",
    "error",
    "print",
    "cell_row",
    "cell_col",
    "data_source",
    "string",
    "table",
    "math",
    "utf8",
    "tostring",
    "tonumber",
    "type",
    "_ENV",
];

struct EngineInner {
    settings: RwLock<Arc<EngineSettings>>,
    registry: Arc<HostTypeRegistry>,
    gatekeeper: Arc<Gatekeeper>,
    namespace: RwLock<Arc<NamespaceTree>>,
    functions: FunctionRegistry,
}

/// Engine state shared by every worker: settings, the namespace tree and
/// registered functions. Cheap to clone.
#[derive(Clone)]
pub struct ScriptEngine {
    inner: Arc<EngineInner>,
}

impl ScriptEngine {
    /// Engine with the built-in host types and the default policy.
    pub fn new(settings: EngineSettings) -> Self {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// One consistent settings snapshot.
    pub fn settings(&self) -> Arc<EngineSettings> {
        Arc::clone(&self.inner.settings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in new settings. The namespace tree and its caches are rebuilt;
    /// sessions already running keep their snapshot.
    pub fn reconfigure(&self, settings: EngineSettings) {
        let tree = build_tree(&self.inner.registry, &self.inner.gatekeeper, &settings);
        *self.inner.namespace.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(tree);
        *self.inner.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
        tracing::debug!("engine reconfigured");
    }

    /// Make `callable` available to scripts as a global function.
    pub fn register_function<F>(&self, name: &str, arity: Arity, callable: F) -> Result<(), EngineError>
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> Result<HostValue, HostError>
            + Send
            + Sync
            + 'static,
    {
        if !is_identifier(name) || RESERVED_NAMES.contains(&name) {
            return Err(EngineError::InvalidFunctionName(name.to_string()));
        }
        self.inner.functions.register(name, arity, callable);
        tracing::debug!(function = name, ?arity, "function registered");
        Ok(())
    }

    /// Names of every registered function, sorted.
    pub fn function_names(&self) -> Vec<String> {
        self.inner.functions.names()
    }

    /// Whether a script in the given mode may reference `name`.
    pub fn is_type_visible(&self, name: &str, restricted: bool) -> bool {
        self.namespace().is_visible(name, restricted)
    }

    /// Whether `name` lies outside the environment namespace or along one of
    /// the configured `env_allow` entries.
    pub fn is_env_permitted(&self, name: &str) -> bool {
        self.namespace().env_permits(name)
    }

    /// The pure policy, independent of registered types and allow-lists.
    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.inner.gatekeeper
    }

    pub fn registry(&self) -> &HostTypeRegistry {
        &self.inner.registry
    }

    /// Create a worker for the calling thread.
    pub fn worker(&self) -> Result<Worker, EngineError> {
        Worker::new(self.clone())
    }

    pub(crate) fn namespace(&self) -> Arc<NamespaceTree> {
        Arc::clone(&self.inner.namespace.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("settings", &self.settings())
            .field("types", &self.inner.registry.len())
            .field("functions", &self.inner.functions.names().len())
            .finish()
    }
}

fn build_tree(
    registry: &Arc<HostTypeRegistry>,
    gatekeeper: &Arc<Gatekeeper>,
    settings: &EngineSettings,
) -> NamespaceTree {
    NamespaceTree::new(
        Arc::clone(registry),
        Arc::clone(gatekeeper),
        settings.allow_packages.clone(),
        settings.env_allow.clone(),
    )
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Builder for engines with extra host types or policy exceptions.
#[derive(Default)]
pub struct EngineBuilder {
    settings: EngineSettings,
    extra_types: Vec<HostType>,
    allowed_types: Vec<String>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn register_type(mut self, ty: HostType) -> Self {
        self.extra_types.push(ty);
        self
    }

    /// Let the gatekeeper accept one more concrete type.
    pub fn allow_type(mut self, name: impl Into<String>) -> Self {
        self.allowed_types.push(name.into());
        self
    }

    pub fn build(self) -> ScriptEngine {
        let mut registry = HostTypeRegistry::with_builtins();
        for ty in self.extra_types {
            registry.register(ty);
        }
        let gatekeeper =
            self.allowed_types.into_iter().fold(Gatekeeper::new(), Gatekeeper::allow_type);

        let registry = Arc::new(registry);
        let gatekeeper = Arc::new(gatekeeper);
        let tree = build_tree(&registry, &gatekeeper, &self.settings);

        ScriptEngine {
            inner: Arc::new(EngineInner {
                settings: RwLock::new(Arc::new(self.settings)),
                registry,
                gatekeeper,
                namespace: RwLock::new(Arc::new(tree)),
                functions: FunctionRegistry::default(),
            }),
        }
    }
}
