use std::path::Path;

use sandcell_core::ScriptEngine;
use sandcell_core::config::ConfigLoader;

use crate::CheckTypeArgs;

pub fn run(config: Option<&Path>, args: &CheckTypeArgs) {
    let rc = match ConfigLoader::load_or_default(config) {
        Ok(rc) => rc,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(1);
        }
    };
    crate::logging::init(&rc);

    let restricted = !args.unrestricted && rc.settings.restricted;
    let engine = ScriptEngine::new(rc.settings);

    if engine.is_type_visible(&args.name, restricted) {
        println!("visible  {}", args.name);
        return;
    }

    if engine.is_env_permitted(&args.name) {
        let verdict = engine.gatekeeper().check(&args.name);
        println!("blocked  {}: {}", args.name, verdict.reason);
    } else {
        println!("blocked  {}: not in namespace.env_allow", args.name);
    }
    std::process::exit(1);
}
