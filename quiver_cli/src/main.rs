mod http;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use quiver_core::campaign::{CampaignReport, CancellationToken, FuzzCampaign};
use quiver_core::config::QuiverConfig;
use quiver_core::corpus::load_seed_file;
use quiver_core::executor::{CommandExecutor, HttpExecutor, SimulatedLock, TargetExecutor};
use quiver_core::input::TestCase;
use quiver_core::output::{FAILURE_FILE_NAME, OutputDir, latest_run_dir};
use quiver_core::probe::probe_failures;
use quiver_core::protocol::ProtocolKind;
use quiver_core::scheduler::ConstantEnergy;

use crate::http::UreqClient;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Feedback-driven mutation fuzzer for stateful protocol targets", long_about = None)]
struct Cli {
    /// TOML configuration; `quiver.toml` is used when present.
    #[clap(short, long, global = true, value_parser)]
    config_file: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set.
    #[clap(long, global = true, default_value = "info")]
    log_level: String,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a campaign from a seed file and print a summary.
    Fuzz(FuzzArgs),
    /// Replay a failure file against the lock and collect logged error codes.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct FuzzArgs {
    /// JSON array of seed test cases.
    seed_file: PathBuf,
    /// Maximum outer iterations.
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Mutants per seed.
    #[clap(short, long)]
    energy: Option<usize>,
    /// RNG seed for a reproducible run.
    #[clap(long)]
    seed: Option<u64>,
    /// Directory the per-run results directory is created in.
    #[clap(short, long)]
    output_dir: Option<PathBuf>,
    #[clap(short, long, value_enum)]
    protocol: Option<ProtocolArg>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Failure file to replay; defaults to the latest run under the output directory.
    #[clap(short, long)]
    failures: Option<PathBuf>,
    #[clap(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProtocolArg {
    Binary,
    Structured,
}

impl From<ProtocolArg> for ProtocolKind {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Binary => ProtocolKind::Binary,
            ProtocolArg::Structured => ProtocolKind::Structured,
        }
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

fn load_config(config_file: Option<&PathBuf>) -> anyhow::Result<QuiverConfig> {
    match config_file {
        Some(config_path) => {
            tracing::info!("loading configuration from {config_path:?}");
            QuiverConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("quiver.toml");
            if default_config_path.exists() {
                tracing::info!("loading default configuration from {default_config_path:?}");
                QuiverConfig::load_from_file(&default_config_path)
            } else {
                tracing::debug!("no configuration file found, using built-in defaults");
                Ok(QuiverConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut QuiverConfig, args: &FuzzArgs) {
    if let Some(iterations) = args.iterations {
        config.fuzzer.max_iterations = iterations;
    }
    if let Some(energy) = args.energy {
        config.fuzzer.energy = energy;
    }
    if let Some(seed) = args.seed {
        config.fuzzer.rng_seed = Some(seed);
    }
    if let Some(dir) = &args.output_dir {
        config.output.base_dir = dir.clone();
    }
    if let Some(protocol) = args.protocol {
        config.target.protocol = protocol.into();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    let config = load_config(cli.config_file.as_ref())?;

    match cli.command {
        Command::Fuzz(args) => fuzz(config, &args),
        Command::Probe(args) => probe(config, &args),
    }
}

fn fuzz(mut config: QuiverConfig, args: &FuzzArgs) -> anyhow::Result<()> {
    apply_overrides(&mut config, args);
    tracing::debug!("effective configuration: {config:#?}");

    let kind = config.target.protocol;
    let seeds = load_seed_file(&args.seed_file, kind)
        .with_context(|| format!("cannot start campaign from {:?}", args.seed_file))?;
    let output = OutputDir::init(&config.output.base_dir).with_context(|| {
        format!("cannot create results directory in {:?}", config.output.base_dir)
    })?;
    tracing::info!(dir = %output.path().display(), seeds = seeds.len(), "results directory ready");

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if interrupt(&handler_token) {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
    .context("failed to install Ctrl-C handler")?;

    let started = Instant::now();
    let report = match kind {
        ProtocolKind::Binary => {
            let executor = CommandExecutor::new(
                SimulatedLock::new(),
                config.target.device_name.clone(),
                config.target.reconnect_pause(),
            );
            run_campaign(executor, seeds, &config, &output, token)?
        }
        ProtocolKind::Structured => {
            let executor = HttpExecutor::new(
                UreqClient::new(),
                config.target.url.clone(),
                config.target.headers.clone(),
                config.target.timeout(),
            );
            run_campaign(executor, seeds, &config, &output, token)?
        }
    };

    println!("{report}");
    println!("  elapsed:          {:.2?}", started.elapsed());
    Ok(())
}

/// Exit status for a run cut short by a second interrupt (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// First interrupt cancels the campaign cooperatively. Returns true on a repeat,
/// when the caller should exit without waiting for the iteration to finish.
fn interrupt(token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        tracing::warn!("second interrupt, exiting without persisting failures");
        return true;
    }
    tracing::warn!(
        "interrupt received, stopping after the current iteration (Ctrl-C again to force)"
    );
    token.cancel();
    false
}

fn run_campaign<E: TargetExecutor>(
    executor: E,
    seeds: Vec<TestCase>,
    config: &QuiverConfig,
    output: &OutputDir,
    token: CancellationToken,
) -> anyhow::Result<CampaignReport> {
    let rng_seed = config.fuzzer.rng_seed.unwrap_or_else(rand::random);
    tracing::info!(rng_seed, "seeding mutation RNG");

    let mut campaign = FuzzCampaign::new(
        config.protocol(),
        seeds,
        executor,
        ConstantEnergy::new(config.fuzzer.energy),
        ChaCha8Rng::seed_from_u64(rng_seed),
    )
    .with_max_iterations(config.fuzzer.max_iterations)
    .with_noise_probability(config.fuzzer.noise_probability)
    .with_failure_file(output.failure_file())
    .with_incremental_persistence(config.fuzzer.persist_incrementally)
    .with_cancellation(token);

    Ok(campaign.run()?)
}

fn probe(config: QuiverConfig, args: &ProbeArgs) -> anyhow::Result<()> {
    let failure_file = match &args.failures {
        Some(path) => path.clone(),
        None => {
            let base_dir = args.output_dir.as_ref().unwrap_or(&config.output.base_dir);
            let run_dir = latest_run_dir(base_dir)
                .with_context(|| format!("cannot list {base_dir:?}"))?
                .ok_or_else(|| anyhow::anyhow!("no fuzzing results found in {base_dir:?}"))?;
            run_dir.join(FAILURE_FILE_NAME)
        }
    };
    let failures = load_seed_file(&failure_file, ProtocolKind::Binary)?;
    println!("Loaded {} interesting inputs from {failure_file:?}", failures.len());

    let mut lock = SimulatedLock::new();
    let summary = probe_failures(
        &mut lock,
        &config.target.device_name,
        &failures,
        config.target.reconnect_pause(),
    );

    for hit in &summary.hits {
        println!("Error Code: {}", hit.error_code);
        println!("Command: {}", hit.command_hex());
        println!("Test: {}", hit.name);
        println!("Logs:");
        for line in &hit.logs {
            println!("  {line}");
        }
        println!("---");
    }
    println!(
        "Replayed {} of {} inputs, {} error codes{}",
        summary.replayed,
        failures.len(),
        summary.hits.len(),
        if summary.aborted { " (aborted)" } else { "" }
    );
    Ok(())
}
