use sandcell_core::config::loader::ConfigLoader;
use sandcell_core::config::{EngineSettings, WrapPolicy};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn write_file(path: &PathBuf, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn load_full_config_ok() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("config.toml");
    let toml = r#"
version = 1

[engine]
timeout_secs = 2
max_stack_depth = 50
max_error_count = 3
instruction_hook_interval = 500
memory_limit = 0
restricted = false
wrap_policy = "fresh"

[restricted]
allow_packages = ["util.regex"]

[namespace]
env_allow = ["env.locale", "env.tz"]

[logging]
level = "debug"
"#;
    write_file(&cfg_path, toml);

    let rc = ConfigLoader::load(Some(&cfg_path)).unwrap();
    assert_eq!(rc.path, cfg_path);
    assert_eq!(rc.settings.timeout_secs, 2);
    assert_eq!(rc.settings.max_stack_depth, 50);
    assert_eq!(rc.settings.max_error_count, 3);
    assert_eq!(rc.settings.instruction_hook_interval, 500);
    assert_eq!(rc.settings.memory_limit, 0);
    assert!(!rc.settings.restricted);
    assert_eq!(rc.settings.wrap_policy, WrapPolicy::Fresh);
    assert_eq!(rc.settings.allow_packages, vec!["util.regex".to_string()]);
    assert_eq!(rc.settings.env_allow.len(), 2);
    assert_eq!(rc.logging.level, "debug");
    assert!(rc.logging.file.is_none());
}

#[test]
fn missing_sections_use_defaults() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("config.toml");
    write_file(&cfg_path, "version = 1\n");

    let rc = ConfigLoader::load(Some(&cfg_path)).unwrap();
    assert_eq!(rc.settings, EngineSettings::default());
    assert_eq!(rc.settings.env_allow, vec!["env.locale".to_string()]);
    assert!(rc.settings.restricted);
    assert_eq!(rc.logging.level, "info");
}

#[test]
fn zero_hook_interval_is_clamped() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("config.toml");
    write_file(&cfg_path, "version = 1\n[engine]\ninstruction_hook_interval = 0\n");

    let rc = ConfigLoader::load(Some(&cfg_path)).unwrap();
    assert_eq!(rc.settings.instruction_hook_interval, 1);
}

#[test]
fn log_file_path_is_expanded() {
    let tmp = tempdir().unwrap();
    let cfg_path = tmp.path().join("config.toml");
    let log_path = tmp.path().join("logs/sandcell.log");
    let toml = format!(
        "version = 1\n[logging]\nlevel = \"warn\"\nfile_level = \"trace\"\nfile = \"{}\"\n",
        log_path.display()
    );
    write_file(&cfg_path, &toml);

    let rc = ConfigLoader::load(Some(&cfg_path)).unwrap();
    assert_eq!(rc.logging.file.as_deref(), Some(log_path.as_path()));
    assert_eq!(rc.logging.file_level.as_deref(), Some("trace"));
}
