use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use eqsim::clock::Clock;
use eqsim::config::SimConfig;
use eqsim::diag::TracingSink;
use eqsim::network::{Group, Network};
use eqsim::{codegen, Backend, Compiler, Constants, Registry};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Values,
    NativeSource,
    Registry,
}

#[derive(Parser, Debug)]
#[command(
    name = "eqsim",
    version,
    about = "Equation simulator — compiles unit-checked equation sets and runs them on a fixed-step clock"
)]
struct Cli {
    /// Equation file (one `name = expr : unit` or `name : unit` per line)
    source: Option<PathBuf>,

    /// Execution backend (overrides the config file)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Tick length in seconds (overrides the config file)
    #[arg(long)]
    dt: Option<f64>,

    /// Simulated duration in seconds [default: one tick]
    #[arg(long)]
    duration: Option<f64>,

    /// Number of elements in the group
    #[arg(long, default_value_t = 1)]
    len: usize,

    /// Initial values: `var=v1,v2,...` (a single value fills the array)
    #[arg(long = "set", value_name = "VAR=VALUES")]
    set: Vec<String>,

    /// External dimensionless constant: `name=value`
    #[arg(long = "const", value_name = "NAME=VALUE")]
    constants: Vec<String>,

    /// Variable to record (repeatable) [default: every update target]
    #[arg(long)]
    monitor: Vec<String>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Values)]
    emit: EmitStage,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log compiler and scheduler activity
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "eqsim=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(code: i32, message: impl std::fmt::Display) -> ! {
    eprintln!("eqsim: error: {message}");
    std::process::exit(code);
}

fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    let (name, value) = arg.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then_some((name, value.trim()))
}

fn parse_values(text: &str) -> Result<Vec<f64>, std::num::ParseFloatError> {
    text.split(',').map(|v| v.trim().parse::<f64>()).collect()
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // ── Configuration ──
    let config = match &cli.config {
        Some(path) => SimConfig::load(path).unwrap_or_else(|e| fail(2, e)),
        None => SimConfig::default(),
    }
    .with_env();
    let dt = cli.dt.unwrap_or(config.dt);
    let backend = cli.backend.unwrap_or(config.backend);

    let registry = Registry::new();
    if let EmitStage::Registry = cli.emit {
        let listing = registry.canonical_json().unwrap_or_else(|e| fail(1, e));
        println!("{listing}");
        return;
    }

    // ── Read source ──
    let Some(path) = &cli.source else {
        fail(2, "no equation file given");
    };
    let source = std::fs::read_to_string(path)
        .unwrap_or_else(|e| fail(2, format!("{}: {}", path.display(), e)));

    let mut constants = Constants::new();
    for arg in &cli.constants {
        let (name, value) = split_assignment(arg)
            .unwrap_or_else(|| fail(2, format!("bad --const `{arg}`, expected NAME=VALUE")));
        let value: f64 = value
            .parse()
            .unwrap_or_else(|e| fail(2, format!("bad --const `{arg}`: {e}")));
        constants = constants.with(name, value);
    }

    let toolchain = if backend == Backend::Native {
        config.toolchain()
    } else {
        None
    };
    let compiler = Compiler::new(&registry).with_toolchain(toolchain);

    if let EmitStage::NativeSource = cli.emit {
        let code = compiler
            .compile_source(&source, &constants, Backend::Interpreted)
            .unwrap_or_else(|e| fail(1, e));
        print!("{}", codegen::generate(code.resolved()).source);
        return;
    }

    // ── Build network ──
    let code = compiler
        .compile_source(&source, &constants, backend)
        .unwrap_or_else(|e| fail(1, e));
    let monitored: Vec<String> = if cli.monitor.is_empty() {
        code.targets().into_iter().map(str::to_string).collect()
    } else {
        cli.monitor.clone()
    };

    let mut group = Group::new("group", cli.len, code);
    for arg in &cli.set {
        let (name, text) = split_assignment(arg)
            .unwrap_or_else(|| fail(2, format!("bad --set `{arg}`, expected VAR=VALUES")));
        let values =
            parse_values(text).unwrap_or_else(|e| fail(2, format!("bad --set `{arg}`: {e}")));
        let result = match values.as_slice() {
            [single] => group.fill(name, *single),
            _ => group.set(name, &values),
        };
        result.unwrap_or_else(|e| fail(2, e));
    }

    let clock = Clock::new(dt).unwrap_or_else(|e| fail(2, e));
    let mut net = Network::new(clock).with_sink(Arc::new(TracingSink));
    let gid = net.add_group(group);
    let monitors: Vec<_> = monitored
        .iter()
        .map(|var| net.add_monitor(gid, var).unwrap_or_else(|e| fail(2, e)))
        .collect();

    // ── Run ──
    net.run(cli.duration.unwrap_or(dt))
        .unwrap_or_else(|e| fail(1, e));

    let report: Vec<_> = monitors
        .iter()
        .filter_map(|id| net.monitor(*id))
        .map(|mon| {
            json!({
                "variable": mon.variable(),
                "times": mon.times(),
                "values": mon.rows(),
            })
        })
        .collect();
    let output = json!({
        "backend": backend,
        "dt": dt,
        "t": net.t(),
        "monitors": report,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => fail(2, e),
    }
}
