//! Restricted namespace resolution.
//!
//! Scripts reach host types through dotted paths (`host.lang.Math`). Each
//! segment is resolved lazily against the [`HostTypeRegistry`], and in
//! restricted sessions the result is fed through the [`Gatekeeper`] unless
//! the path sits under an always-allowed package.

pub(crate) mod bindings;
mod node;

use std::sync::Arc;

use crate::host::HostTypeRegistry;
use crate::security::Gatekeeper;

pub use bindings::{NamespaceHandle, TypeHandle};
pub use node::{NamespaceNode, Resolution};
pub(crate) use node::{ResolverContext, segment_is_invalid};

/// Root of the namespace tree shared by every worker of an engine.
#[derive(Debug)]
pub struct NamespaceTree {
    root: Arc<NamespaceNode>,
}

impl NamespaceTree {
    pub fn new(
        registry: Arc<HostTypeRegistry>,
        gatekeeper: Arc<Gatekeeper>,
        allow_packages: Vec<String>,
        env_allow: Vec<String>,
    ) -> Self {
        let ctx = ResolverContext { registry, gatekeeper, allow_packages, env_allow };
        Self { root: Arc::new(NamespaceNode::root(Arc::new(ctx))) }
    }

    pub fn root(&self) -> Arc<NamespaceNode> {
        Arc::clone(&self.root)
    }

    /// Walk a full dotted path.
    pub fn resolve_path(&self, path: &str, restricted: bool) -> Resolution {
        if path.is_empty() {
            return Resolution::NotFound;
        }
        let mut node = self.root();
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            match node.resolve(segment, restricted) {
                Resolution::Namespace(child) if segments.peek().is_some() => node = child,
                Resolution::Type(_) if segments.peek().is_some() => return Resolution::NotFound,
                other => return other,
            }
        }
        Resolution::NotFound
    }

    /// False for `env` paths outside the configured entries.
    pub fn env_permits(&self, path: &str) -> bool {
        self.root.context().env_permits(path)
    }

    /// Whether a script in the given mode may reference `name`. Names that
    /// are not registered fall back to the pure gatekeeper policy.
    pub fn is_visible(&self, name: &str, restricted: bool) -> bool {
        if segment_is_invalid(name) {
            return false;
        }
        match self.resolve_path(name, restricted) {
            Resolution::Type(_) => true,
            Resolution::Blocked(_) => false,
            Resolution::Namespace(_) | Resolution::NotFound => {
                let ctx = self.root.context();
                if !ctx.env_permits(name) {
                    false
                } else if restricted {
                    ctx.is_always_allowed(name) || ctx.gatekeeper.is_visible(name)
                } else {
                    true
                }
            }
        }
    }
}
