use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub restricted: RestrictedConfig,
    #[serde(default)]
    pub namespace: NamespaceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How date values are exposed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapPolicy {
    /// Recycle wrappers from the per-worker pools.
    #[default]
    Pooled,
    /// Allocate a new wrapper for every date.
    Fresh,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock limit per top-level run, in seconds. 0 disables it.
    pub timeout_secs: u64,
    /// 0 disables the check.
    pub max_stack_depth: usize,
    /// Failures of one unit before further runs are skipped. 0 disables it.
    pub max_error_count: usize,
    pub instruction_hook_interval: u32,
    /// Bytes, 0 for no limit.
    pub memory_limit: usize,
    /// Default restriction mode for new sessions.
    pub restricted: bool,
    pub wrap_policy: WrapPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_stack_depth: 200,
            max_error_count: 10,
            instruction_hook_interval: 1000,
            memory_limit: 16 * 1024 * 1024,
            restricted: true,
            wrap_policy: WrapPolicy::Pooled,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestrictedConfig {
    /// Packages whose types stay reachable in restricted sessions.
    #[serde(default)]
    pub allow_packages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default = "default_env_allow")]
    pub env_allow: Vec<String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self { env_allow: default_env_allow() }
    }
}

fn default_env_allow() -> Vec<String> {
    vec!["env.locale".to_string()]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file_level: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file_level: None, file: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Immutable engine settings. Shared as one `Arc` snapshot per evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSettings {
    pub timeout_secs: u64,
    pub max_stack_depth: usize,
    pub max_error_count: usize,
    pub instruction_hook_interval: u32,
    pub memory_limit: usize,
    pub restricted: bool,
    pub wrap_policy: WrapPolicy,
    pub allow_packages: Vec<String>,
    pub env_allow: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_sections(
            &EngineConfig::default(),
            &RestrictedConfig::default(),
            &NamespaceConfig::default(),
        )
    }
}

impl EngineSettings {
    pub fn from_sections(
        engine: &EngineConfig,
        restricted: &RestrictedConfig,
        namespace: &NamespaceConfig,
    ) -> Self {
        Self {
            timeout_secs: engine.timeout_secs,
            max_stack_depth: engine.max_stack_depth,
            max_error_count: engine.max_error_count,
            instruction_hook_interval: engine.instruction_hook_interval.max(1),
            memory_limit: engine.memory_limit,
            restricted: engine.restricted,
            wrap_policy: engine.wrap_policy,
            allow_packages: restricted.allow_packages.clone(),
            env_allow: namespace.env_allow.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub path: PathBuf,
    pub settings: EngineSettings,
    pub logging: LoggingConfig,
}
