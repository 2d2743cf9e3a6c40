mod logging;

mod cmd {
    pub mod check_type;
    pub mod doctor;
    pub mod eval;
    pub mod output;
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sandcell", version, about = "Evaluate formula scripts in a sandbox")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate configuration and print the resolved engine settings
    Doctor,

    /// Compile and run one expression or statement block
    Eval(EvalArgs),

    /// Report whether a host type is reachable from scripts
    CheckType(CheckTypeArgs),
}

#[derive(Debug, Args)]
pub struct EvalArgs {
    /// Script source
    pub source: String,

    /// Run without namespace restrictions
    #[arg(long)]
    pub unrestricted: bool,

    /// Bind a variable, as name=value (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Override the timeout, in seconds (0 disables it)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Evaluate as if in the given cell, as row,col
    #[arg(long, value_name = "ROW,COL")]
    pub cell: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CheckTypeArgs {
    /// Fully-qualified type name, e.g. lang.Math
    pub name: String,

    /// Answer for an unrestricted session
    #[arg(long)]
    pub unrestricted: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Doctor => cmd::doctor::run(cli.config.as_deref()),
        Commands::Eval(args) => cmd::eval::run(cli.config.as_deref(), &args),
        Commands::CheckType(args) => cmd::check_type::run(cli.config.as_deref(), &args),
    }
    logging::shutdown();
    Ok(())
}
