use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn doctor_reports_resolved_settings() {
    let tmp = tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    fs::write(
        &cfg,
        r#"
version = 1

[engine]
timeout_secs = 3
wrap_policy = "fresh"

[restricted]
allow_packages = ["util.regex"]
"#,
    )
    .unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("sandcell"))
        .args(["doctor", "--config", cfg.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK   sandcell doctor"))
        .stdout(predicate::str::contains("engine.timeout_secs: 3"))
        .stdout(predicate::str::contains("engine.wrap_policy: Fresh"))
        .stdout(predicate::str::contains("restricted.allow_packages: [util.regex]"))
        .stdout(predicate::str::contains("namespace.env_allow: [env.locale]"));
}

#[test]
fn doctor_finds_config_under_xdg_home() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("sandcell");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), "version = 1\n").unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("sandcell"))
        .env("XDG_CONFIG_HOME", tmp.path())
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("engine.restricted: true"));
}
