use sandcell_core::config::{ConfigLoader, default_config_path};
use std::path::Path;

pub fn run(config: Option<&Path>) {
    match ConfigLoader::load(config) {
        Ok(rc) => {
            crate::logging::init(&rc);
            let s = &rc.settings;
            println!("OK   sandcell doctor");
            println!("path: {}", rc.path.display());
            println!("build: {}", sandcell_core::build_info());
            println!("engine.timeout_secs: {}", s.timeout_secs);
            println!("engine.max_stack_depth: {}", s.max_stack_depth);
            println!("engine.max_error_count: {}", s.max_error_count);
            println!("engine.instruction_hook_interval: {}", s.instruction_hook_interval);
            println!("engine.memory_limit: {}", s.memory_limit);
            println!("engine.restricted: {}", s.restricted);
            println!("engine.wrap_policy: {:?}", s.wrap_policy);
            println!("restricted.allow_packages: [{}]", s.allow_packages.join(", "));
            println!("namespace.env_allow: [{}]", s.env_allow.join(", "));
            println!("logging.level: {}", rc.logging.level);
            if let Some(ref file) = rc.logging.file {
                println!("logging.file: {}", file.display());
            }
            tracing::debug!("doctor finished");
        }
        Err(e) => {
            println!("FAIL sandcell doctor");
            println!("{e}");
            if config.is_none() {
                println!("looked for: {}", default_config_path().display());
            }
            std::process::exit(1);
        }
    }
}
