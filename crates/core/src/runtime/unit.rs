//! Compiled units.

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Binds the per-run environment table passed as the chunk's first vararg.
/// Kept on the first source line so reported line numbers match the script.
const ENV_PRELUDE: &str = "local _ENV = ...; ";

/// Which shape the source was accepted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitForm {
    Expression,
    Statements,
}

impl UnitForm {
    pub(crate) fn prepare(self, source: &str) -> String {
        match self {
            UnitForm::Expression => format!("{ENV_PRELUDE}return ({source}\n)"),
            UnitForm::Statements => format!("{ENV_PRELUDE}{source}\n"),
        }
    }
}

struct UnitInner {
    id: u64,
    name: String,
    source: String,
    prepared: String,
    form: UnitForm,
}

/// An immutable, thread-shareable compiled script.
///
/// The unit only carries validated source; each worker materialises its own
/// Lua function for it on first use and keeps no state in the unit.
#[derive(Clone)]
pub struct CompiledUnit {
    inner: Arc<UnitInner>,
}

impl CompiledUnit {
    pub(crate) fn new(name: &str, source: &str, form: UnitForm) -> Self {
        let inner = UnitInner {
            id: NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            source: source.to_string(),
            prepared: form.prepare(source),
            form,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Source as written by the user.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub(crate) fn prepared(&self) -> &str {
        &self.inner.prepared
    }

    pub fn form(&self) -> UnitForm {
        self.inner.form
    }

    pub(crate) fn downgrade(&self) -> UnitRef {
        UnitRef(Arc::downgrade(&self.inner))
    }
}

/// Non-owning reference used by worker caches to notice dropped units.
#[derive(Clone)]
pub(crate) struct UnitRef(Weak<UnitInner>);

impl UnitRef {
    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("form", &self.inner.form)
            .finish()
    }
}
