use crate::config::types::{ConfigFile, EngineSettings, LoggingConfig, ResolvedConfig};
use shellexpand::full;
use std::path::{Path, PathBuf};
use std::{env, fs};

use dirs::home_dir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(String),

    #[error("failed to read config file {0}: {1}")]
    ReadError(String, #[source] std::io::Error),

    #[error("failed to parse TOML in {0}: {1}")]
    ParseError(String, #[source] toml::de::Error),

    #[error("version {0} is unsupported (expected 1)")]
    BadVersion(u32),

    #[error("home directory not available to expand '~'")]
    NoHome,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(config_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let s = fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e))?;

        let cf: ConfigFile = toml::from_str(&s)
            .map_err(|e| ConfigError::ParseError(path.display().to_string(), e))?;

        if cf.version != 1 {
            return Err(ConfigError::BadVersion(cf.version));
        }

        let settings = EngineSettings::from_sections(&cf.engine, &cf.restricted, &cf.namespace);
        let logging = resolve_logging(&cf.logging)?;
        tracing::debug!(path = %path.display(), "configuration loaded");

        Ok(ResolvedConfig { path, settings, logging })
    }

    /// Like [`ConfigLoader::load`], but a missing file at the default location
    /// yields built-in defaults. An explicit path must exist.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
        match Self::load(config_path) {
            Err(ConfigError::NotFound(_)) if config_path.is_none() => Ok(ResolvedConfig {
                path: default_config_path(),
                settings: EngineSettings::default(),
                logging: LoggingConfig::default(),
            }),
            other => other,
        }
    }
}

fn resolve_logging(log_cfg: &LoggingConfig) -> Result<LoggingConfig, ConfigError> {
    let Some(ref file) = log_cfg.file else {
        return Ok(log_cfg.clone());
    };
    Ok(LoggingConfig {
        level: log_cfg.level.clone(),
        file_level: log_cfg.file_level.clone(),
        file: Some(expand_path(&file.to_string_lossy())?),
    })
}

pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("sandcell").join("config.toml");
    }
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("sandcell").join("config.toml")
}

fn expand_path(input: &str) -> Result<PathBuf, ConfigError> {
    let expanded = full(input).map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(expanded.to_string()))
}
