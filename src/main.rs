#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

use xlang_bench::engine::ToolPaths;
use xlang_bench::run_cmd::{self, RunOptions};
use xlang_bench::clear_cmd;

#[derive(Parser, Debug)]
#[command(name = "xlang-bench")]
#[command(about = "Correctness and benchmark runner for cross-language call pathways", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["config", "clear_config"])))]
struct Cli {
    /// Run config (YAML, or TOML by extension)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remove resume state, session directories and canonical results of a config
    #[arg(long, value_name = "CONFIG", conflicts_with = "config")]
    clear_config: Option<PathBuf>,

    /// Rerun only these scenarios and merge them into the canonical results
    /// (`name` or `name_<size>`, repeatable, comma separated)
    #[arg(long = "scenario", value_name = "SELECTOR")]
    scenarios: Vec<String>,

    /// Root directory of the test programs
    #[arg(long, default_value = ".")]
    tests_root: PathBuf,

    /// Base for relative output directories (default: parent of --tests-root)
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Python interpreter
    #[arg(long)]
    python: Option<PathBuf>,

    /// Go executable
    #[arg(long)]
    go: Option<PathBuf>,

    /// Maven executable (default: first of mvn, mvn.cmd on PATH)
    #[arg(long)]
    maven: Option<PathBuf>,

    /// Enable verbose logging (or set XLANG_BENCH_LOG)
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let env = std::env::var("XLANG_BENCH_LOG").unwrap_or_else(|_| {
        if verbose { "xlang_bench=debug".to_string() } else { "xlang_bench=info".to_string() }
    });
    let _ = tracing_subscriber::fmt()
        .with_span_events(FmtSpan::ACTIVE)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_env_filter(EnvFilter::new(env))
        .try_init();
}

fn tools(cli: &Cli) -> ToolPaths {
    let mut tools = ToolPaths::new();
    if let Some(go) = &cli.go {
        tools = tools.with_go(go);
    }
    if let Some(python) = &cli.python {
        tools = tools.with_python(python);
    }
    if let Some(maven) = &cli.maven {
        tools = tools.with_maven(maven);
    }
    tools
}

fn main() {
    color_eyre::install().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match (&cli.clear_config, &cli.config) {
        (Some(path), _) => {
            clear_cmd::run(path, &cli.tests_root, cli.repo_root.as_deref()).map(|()| 0)
        }
        (None, Some(path)) => {
            let mut opts = RunOptions::new(path, &cli.tests_root)
                .with_scenarios(cli.scenarios.clone())
                .with_tools(tools(&cli));
            if let Some(root) = &cli.repo_root {
                opts = opts.with_repo_root(root);
            }
            run_cmd::run(opts)
        }
        // clap's required group rules this out
        (None, None) => Ok(2),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    }
}
