//! Type visibility policy.
//!
//! The gatekeeper answers one question: may a script observe or instantiate
//! the host type with this fully-qualified name? It never errors, it only
//! returns a [`TypeVerdict`]. Anything not explicitly allowed is blocked.

use std::collections::HashSet;
use std::fmt;

/// Package prefixes no script may reach into.
const DENIED_PACKAGES: &[&str] = &[
    "lang.reflect.",
    "lang.invoke.",
    "lang.instrument.",
    "lang.management.",
    "process.",
    "io.",
    "fs.",
    "net.",
    "loader.",
    "thread.",
    "util.concurrent.",
    "sync.",
];

/// Concrete types that are dangerous even though their package is not.
const DENIED_TYPES: &[&str] = &[
    "lang.Runtime",
    "lang.Process",
    "lang.ProcessBuilder",
    "lang.System",
    "lang.Thread",
    "lang.ThreadGroup",
    "lang.ClassLoader",
    "lang.SecurityManager",
    "util.ServiceLoader",
    "util.Timer",
    "fs.File",
    "net.Socket",
    "net.ServerSocket",
];

/// Curated value types that are always visible.
const SAFE_TYPES: &[&str] = &[
    // primitives
    "boolean",
    "byte",
    "char",
    "short",
    "int",
    "long",
    "float",
    "double",
    // boxed numerics and text
    "lang.Boolean",
    "lang.Byte",
    "lang.Character",
    "lang.Short",
    "lang.Integer",
    "lang.Long",
    "lang.Float",
    "lang.Double",
    "lang.Number",
    "lang.String",
    "lang.StringBuilder",
    "lang.Math",
    // collections
    "util.ArrayList",
    "util.Arrays",
    "util.Collections",
    "util.HashMap",
    "util.HashSet",
    "util.LinkedHashMap",
    "util.List",
    "util.Map",
    "util.Set",
    // dates
    "util.Date",
    "util.Calendar",
    "util.GregorianCalendar",
    "util.TimeZone",
    "time.Date",
    "time.Time",
    "time.Timestamp",
    "time.Duration",
    "time.Instant",
    // regex and formatters
    "util.regex.Pattern",
    "util.regex.Matcher",
    "text.DecimalFormat",
    "text.NumberFormat",
    "text.SimpleDateFormat",
    "text.MessageFormat",
    // arbitrary precision
    "math.BigDecimal",
    "math.BigInteger",
];

/// `util` sub-packages that stay closed even though `util` is a category.
const UTIL_EXCLUDED: &[&str] = &["util.spi.", "util.jar.", "util.zip."];

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictReason {
    Empty,
    DeniedPackage(&'static str),
    DeniedType,
    AllowListed,
    Category(&'static str),
    Unlisted,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictReason::Empty => write!(f, "empty type name"),
            VerdictReason::DeniedPackage(prefix) => {
                write!(f, "package '{}' is denied", prefix.trim_end_matches('.'))
            }
            VerdictReason::DeniedType => write!(f, "type is on the deny list"),
            VerdictReason::AllowListed => write!(f, "allow-listed value type"),
            VerdictReason::Category(category) => write!(f, "basic {category} type"),
            VerdictReason::Unlisted => write!(f, "type is not on any allow list"),
        }
    }
}

/// The gatekeeper's decision for one type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeVerdict {
    pub type_name: String,
    pub visible: bool,
    pub reason: VerdictReason,
}

impl TypeVerdict {
    fn new(type_name: &str, visible: bool, reason: VerdictReason) -> Self {
        Self { type_name: type_name.to_string(), visible, reason }
    }
}

#[derive(Debug, Clone)]
pub struct Gatekeeper {
    allowed: HashSet<String>,
}

impl Default for Gatekeeper {
    fn default() -> Self {
        Self { allowed: SAFE_TYPES.iter().map(|s| (*s).to_string()).collect() }
    }
}

impl Gatekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an embedder-provided value type to the allow-list. Deny rules
    /// still take priority.
    pub fn allow_type(mut self, name: impl Into<String>) -> Self {
        self.allowed.insert(name.into());
        self
    }

    pub fn is_visible(&self, type_name: &str) -> bool {
        self.check(type_name).visible
    }

    /// Evaluate the policy for `type_name`. Blocked verdicts are logged.
    pub fn check(&self, type_name: &str) -> TypeVerdict {
        let verdict = self.evaluate(type_name);
        if !verdict.visible {
            match verdict.reason {
                VerdictReason::DeniedPackage(prefix) => tracing::warn!(
                    type_name,
                    package = prefix.trim_end_matches('.'),
                    "policy violation: script referenced a denied package"
                ),
                reason => tracing::warn!(type_name, %reason, "blocked host type"),
            }
        }
        verdict
    }

    fn evaluate(&self, type_name: &str) -> TypeVerdict {
        let name = type_name.trim();
        if name.is_empty() {
            return TypeVerdict::new(type_name, false, VerdictReason::Empty);
        }

        if let Some(prefix) = DENIED_PACKAGES.iter().find(|p| name.starts_with(**p)) {
            return TypeVerdict::new(type_name, false, VerdictReason::DeniedPackage(prefix));
        }

        if DENIED_TYPES.contains(&name) {
            return TypeVerdict::new(type_name, false, VerdictReason::DeniedType);
        }

        if let Some(element) = name.strip_suffix("[]") {
            let inner = self.evaluate(element);
            return TypeVerdict::new(type_name, inner.visible, inner.reason);
        }

        if self.allowed.contains(name) {
            return TypeVerdict::new(type_name, true, VerdictReason::AllowListed);
        }

        match category_of(name) {
            Some(category) => TypeVerdict::new(type_name, true, VerdictReason::Category(category)),
            None => TypeVerdict::new(type_name, false, VerdictReason::Unlisted),
        }
    }
}

/// Category patterns: a single segment directly under `lang`, `math`, `text`
/// or `time`, or anything under `util` outside its excluded sub-packages.
fn category_of(name: &str) -> Option<&'static str> {
    let single_segment = |package: &str| {
        name.strip_prefix(package)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('.'))
    };

    if single_segment("lang.") {
        Some("lang")
    } else if single_segment("math.") {
        Some("math")
    } else if single_segment("text.") {
        Some("text")
    } else if single_segment("time.") {
        Some("time")
    } else if name.strip_prefix("util.").is_some_and(|rest| !rest.is_empty())
        && !UTIL_EXCLUDED.iter().any(|p| name.starts_with(p))
    {
        Some("util")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("lang.String", true)]
    #[case("lang.Math", true)]
    #[case("math.BigDecimal", true)]
    #[case("util.regex.Pattern", true)]
    #[case("lang.StringUtils", true)]
    #[case("util.Optional", true)]
    #[case("util.stream.Collectors", true)]
    #[case("text.ChoiceFormat", true)]
    #[case("time.LocalDate", true)]
    #[case("lang.System", false)]
    #[case("lang.Runtime", false)]
    #[case("lang.reflect.Method", false)]
    #[case("lang.invoke.MethodHandle", false)]
    #[case("process.Command", false)]
    #[case("io.FileInputStream", false)]
    #[case("net.Socket", false)]
    #[case("util.concurrent.Executors", false)]
    #[case("util.ServiceLoader", false)]
    #[case("util.zip.ZipFile", false)]
    #[case("lang.ref.Cleaner", false)]
    #[case("time.format.DateTimeFormatter", false)]
    #[case("com.example.Widget", false)]
    #[case("Widget", false)]
    #[case("", false)]
    #[case("   ", false)]
    fn test_visibility(#[case] name: &str, #[case] visible: bool) {
        assert_eq!(Gatekeeper::new().is_visible(name), visible, "{name}");
    }

    #[rstest]
    #[case("lang.String[]", true)]
    #[case("lang.String[][]", true)]
    #[case("lang.Thread[]", false)]
    #[case("com.example.Widget[]", false)]
    fn test_array_follows_element(#[case] name: &str, #[case] visible: bool) {
        assert_eq!(Gatekeeper::new().is_visible(name), visible, "{name}");
    }

    #[test]
    fn test_deny_rules_beat_allow_list() {
        let gate = Gatekeeper::new().allow_type("lang.System").allow_type("com.example.Widget");
        assert!(!gate.is_visible("lang.System"));
        assert!(gate.is_visible("com.example.Widget"));
    }

    #[test]
    fn test_verdict_reasons() {
        let gate = Gatekeeper::new();
        assert_eq!(gate.check("lang.String").reason, VerdictReason::AllowListed);
        assert_eq!(gate.check("lang.Foo").reason, VerdictReason::Category("lang"));
        assert_eq!(gate.check("net.URL").reason, VerdictReason::DeniedPackage("net."));
        assert_eq!(gate.check("lang.Thread").reason, VerdictReason::DeniedType);
        assert_eq!(gate.check("").reason, VerdictReason::Empty);
        assert_eq!(gate.check("org.Thing").reason.to_string(), "type is not on any allow list");
    }

    #[test]
    fn test_unlisted_names_fail_closed() {
        let gate = Gatekeeper::new();
        for name in ["a", "a.b", "a.b.c", "langx.String", "mathx.Big", "lang..String", "util."] {
            assert!(!gate.is_visible(name), "{name} should be blocked");
        }
    }
}
