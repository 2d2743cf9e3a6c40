//! Lazily-resolved namespace tree.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::host::{HostType, HostTypeRegistry, TypeLookup};
use crate::security::{Gatekeeper, TypeVerdict};

/// Namespace under which the host keeps its own environment types.
const ENV_ROOT: &str = "env";

/// Outcome of resolving one path segment.
#[derive(Clone)]
pub enum Resolution {
    Namespace(Arc<NamespaceNode>),
    Type(Arc<HostType>),
    Blocked(TypeVerdict),
    /// No such binding. Distinct from a host `Null` value.
    NotFound,
}

impl Resolution {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Resolution::NotFound)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Namespace(node) => write!(f, "Namespace({})", node.path()),
            Resolution::Type(ty) => write!(f, "Type({})", ty.name()),
            Resolution::Blocked(verdict) => write!(f, "Blocked({}: {})", verdict.type_name, verdict.reason),
            Resolution::NotFound => write!(f, "NotFound"),
        }
    }
}

/// State shared by every node of one tree.
pub(crate) struct ResolverContext {
    pub(crate) registry: Arc<HostTypeRegistry>,
    pub(crate) gatekeeper: Arc<Gatekeeper>,
    pub(crate) allow_packages: Vec<String>,
    pub(crate) env_allow: Vec<String>,
}

impl ResolverContext {
    /// True when `path` or one of its ancestors is always allowed, even in
    /// restricted sessions. Configured environment entries count as allowed.
    pub(crate) fn is_always_allowed(&self, path: &str) -> bool {
        self.allow_packages.iter().any(|p| is_within(path, p))
            || (is_within(path, ENV_ROOT) && self.env_allow.iter().any(|e| is_within(path, e)))
    }

    /// Paths under the environment namespace resolve only along configured
    /// entries: ancestors, the entry itself, or its descendants.
    pub(crate) fn env_permits(&self, path: &str) -> bool {
        if !is_within(path, ENV_ROOT) {
            return true;
        }
        self.env_allow.iter().any(|entry| is_within(path, entry) || is_within(entry, path))
    }
}

/// `path` equals `base` or lies below it, on segment boundaries.
fn is_within(path: &str, base: &str) -> bool {
    path.strip_prefix(base).is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// One node of the namespace tree, with separate caches for restricted and
/// unrestricted lookups.
pub struct NamespaceNode {
    path: String,
    allowed: bool,
    ctx: Arc<ResolverContext>,
    restricted: DashMap<String, Resolution>,
    unrestricted: DashMap<String, Resolution>,
}

impl NamespaceNode {
    pub(crate) fn root(ctx: Arc<ResolverContext>) -> Self {
        let allowed = ctx.is_always_allowed("");
        Self::new(String::new(), allowed, ctx)
    }

    fn new(path: String, allowed: bool, ctx: Arc<ResolverContext>) -> Self {
        Self { path, allowed, ctx, restricted: DashMap::new(), unrestricted: DashMap::new() }
    }

    /// Dotted path of this node; empty for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn context(&self) -> &ResolverContext {
        &self.ctx
    }

    /// Whether lookups below this node skip gating in restricted sessions.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Resolve the next segment. Each mode has its own cache and a result is
    /// computed at most once per key and mode.
    pub fn resolve(&self, segment: &str, restricted: bool) -> Resolution {
        let cache = if restricted { &self.restricted } else { &self.unrestricted };
        if let Some(hit) = cache.get(segment) {
            return hit.value().clone();
        }
        cache
            .entry(segment.to_string())
            .or_insert_with(|| self.compute(segment, restricted))
            .value()
            .clone()
    }

    fn child_path(&self, segment: &str) -> String {
        if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.path, segment)
        }
    }

    fn compute(&self, segment: &str, restricted: bool) -> Resolution {
        let path = self.child_path(segment);
        let resolution = self.compute_path(&path, restricted);
        tracing::trace!(path = %path, restricted, result = ?resolution, "namespace cache fill");
        resolution
    }

    fn compute_path(&self, path: &str, restricted: bool) -> Resolution {
        if segment_is_invalid(path) || !self.ctx.env_permits(path) {
            return Resolution::NotFound;
        }

        let allowed = self.allowed || self.ctx.is_always_allowed(path);
        match self.ctx.registry.lookup(path) {
            TypeLookup::Missing => Resolution::NotFound,
            TypeLookup::Package => Resolution::Namespace(Arc::new(NamespaceNode::new(
                path.to_string(),
                allowed,
                Arc::clone(&self.ctx),
            ))),
            TypeLookup::Type(ty) if !restricted || allowed => Resolution::Type(ty),
            TypeLookup::Type(ty) => {
                let verdict = self.ctx.gatekeeper.check(path);
                if verdict.visible { Resolution::Type(ty) } else { Resolution::Blocked(verdict) }
            }
        }
    }

    /// Entries currently cached for the given mode.
    pub fn cached(&self, restricted: bool) -> usize {
        if restricted { self.restricted.len() } else { self.unrestricted.len() }
    }
}

/// Empty names, empty segments and surrounding whitespace.
pub(crate) fn segment_is_invalid(path: &str) -> bool {
    path.trim() != path || path.split('.').any(str::is_empty)
}

impl fmt::Debug for NamespaceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceNode")
            .field("path", &self.path)
            .field("allowed", &self.allowed)
            .field("restricted_cached", &self.restricted.len())
            .field("unrestricted_cached", &self.unrestricted.len())
            .finish()
    }
}
