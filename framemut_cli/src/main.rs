use framemut_core::config::{ConfigInputDelivery, FramemutConfig, RunSettings, SwapSearch};
use framemut_core::executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionStatus, Executor, InputDelivery,
};
use framemut_core::input::Input;
use framemut_core::instance::MutatorInstance;
use framemut_core::scanner::Frames;
use framemut_core::{MutationConfig, MutationReport};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEFAULT_CONFIG_FILE: &str = "framemut.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Frame-aware mutator for fuzzing MPEG audio decoders", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write mutated copies of an input file.
    Mutate(MutateArgs),
    /// List the frames the mutator would see in a file.
    Scan(ScanArgs),
    /// Mutate a seed repeatedly and run each output through a decode harness.
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
struct MutationOverrides {
    /// Start from a named preset: `frame` (p = 0.5) or `read` (p = 0.05).
    #[clap(long)]
    preset: Option<String>,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long)]
    mutation_probability: Option<f64>,
    #[clap(long)]
    swap_probability: Option<f64>,
    /// Let a frame swap with the frame directly after it.
    #[clap(long)]
    at_boundary: bool,
}

#[derive(Args, Debug)]
struct MutateArgs {
    #[clap(short, long)]
    input: PathBuf,
    /// Output file, or output directory when --count is above 1.
    #[clap(short, long)]
    output: PathBuf,
    #[clap(short = 'n', long, default_value_t = 1)]
    count: usize,
    /// Print per-output reports as JSON lines.
    #[clap(long)]
    json: bool,
    #[clap(flatten)]
    overrides: MutationOverrides,
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[clap(short, long)]
    input: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[clap(short, long)]
    input: PathBuf,
    #[clap(long)]
    iterations: Option<u64>,
    #[clap(long)]
    crash_dir: Option<PathBuf>,
    #[clap(long)]
    timeout_ms: Option<u64>,
    #[clap(flatten)]
    overrides: MutationOverrides,
    /// Harness command, e.g. `-- ./fuzz_mp3dec_ex_read`. An `@@` argument switches to
    /// file delivery; otherwise the input is written to stdin.
    #[clap(last = true)]
    target: Vec<String>,
}

fn load_config(config_file: Option<&Path>) -> Result<FramemutConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            Ok(FramemutConfig::load_from_file(config_path)?)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                Ok(FramemutConfig::load_from_file(&default_config_path)?)
            } else {
                debug!("No config file found, using built-in defaults.");
                Ok(FramemutConfig::default())
            }
        }
    }
}

fn apply_overrides(
    base: MutationConfig,
    overrides: &MutationOverrides,
) -> Result<MutationConfig, anyhow::Error> {
    let mut config = match &overrides.preset {
        Some(name) => MutationConfig::preset(name)?.with_capacity(base.capacity),
        None => base,
    };
    if let Some(p) = overrides.mutation_probability {
        config = config.with_mutation_probability(p);
    }
    if let Some(p) = overrides.swap_probability {
        config = config.with_swap_probability(p);
    }
    if overrides.at_boundary {
        config = config.with_swap_search(SwapSearch::AtBoundary);
    }
    config.validate()?;
    Ok(config)
}

fn output_path(output: &Path, count: usize, index: usize) -> PathBuf {
    if count <= 1 {
        output.to_path_buf()
    } else {
        output.join(format!("id_{index:06}"))
    }
}

fn print_report(report: &MutationReport, path: &Path, json: bool) -> Result<(), anyhow::Error> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!(
            "{}: {} bytes, {} frames, {} bytes flipped, {} swaps",
            path.display(),
            report.len,
            report.frames,
            report.flipped_bytes,
            report.swaps
        );
    }
    Ok(())
}

fn mutate(args: MutateArgs, config: &FramemutConfig) -> Result<(), anyhow::Error> {
    let run = config.run.clone().unwrap_or_default();
    let mutation = apply_overrides(config.mutation, &args.overrides)?;
    let seed = args.overrides.seed.unwrap_or(run.seed);

    let data = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read input {:?}", args.input))?;
    if data.len() > mutation.capacity {
        warn!(
            "Input is {} bytes, outputs are truncated to the {}-byte capacity",
            data.len(),
            mutation.capacity
        );
    }
    if args.count > 1 {
        std::fs::create_dir_all(&args.output)
            .with_context(|| format!("Failed to create output directory {:?}", args.output))?;
    }

    let mut instance = MutatorInstance::with_config(seed, mutation)?;
    for index in 0..args.count {
        let report = instance.mutate(&data, usize::MAX);
        let path = output_path(&args.output, args.count, index);
        std::fs::write(&path, instance.output())
            .with_context(|| format!("Failed to write output {path:?}"))?;
        print_report(&report, &path, args.json)?;
    }
    Ok(())
}

fn scan(args: ScanArgs) -> Result<(), anyhow::Error> {
    let data = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read input {:?}", args.input))?;

    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    let mut first_start = None;
    for frame in Frames::new(&data) {
        first_start.get_or_insert(frame.start);
        println!("{:>10}..{:<10} {:>8}", frame.start, frame.end, frame.len());
        *sizes.entry(frame.len()).or_default() += 1;
    }

    let frames: usize = sizes.values().sum();
    let swappable: usize = sizes.values().filter(|&&n| n > 1).sum();
    println!(
        "{} frames in {} bytes, {} leading bytes, {} distinct lengths, {} frames share a length",
        frames,
        data.len(),
        first_start.unwrap_or(data.len()),
        sizes.len(),
        swappable
    );
    Ok(())
}

fn executor_config(run: &RunSettings, target: Vec<String>) -> CommandExecutorConfig {
    let command = if target.is_empty() {
        run.target_command.clone()
    } else {
        target
    };
    let has_placeholder = command
        .iter()
        .any(|arg| arg.contains(framemut_core::executor::INPUT_FILE_PLACEHOLDER));
    let input_delivery = match run.input_delivery {
        ConfigInputDelivery::File => InputDelivery::File,
        ConfigInputDelivery::StdIn if has_placeholder => InputDelivery::File,
        ConfigInputDelivery::StdIn => InputDelivery::StdIn,
    };
    CommandExecutorConfig {
        command,
        input_delivery,
        timeout: Duration::from_millis(run.timeout_ms),
        working_dir: None,
    }
}

fn save_crash(crash_dir: &Path, input: &[u8]) -> Result<PathBuf, anyhow::Error> {
    let path = crash_dir.join(format!("{:x}", md5::compute(input)));
    if !path.exists() {
        std::fs::create_dir_all(crash_dir)
            .with_context(|| format!("Failed to create crash directory {crash_dir:?}"))?;
        std::fs::write(&path, input).with_context(|| format!("Failed to write crash {path:?}"))?;
    }
    Ok(path)
}

fn run(args: RunArgs, config: &FramemutConfig) -> Result<(), anyhow::Error> {
    let mut settings = config.run.clone().unwrap_or_default();
    if let Some(iterations) = args.iterations {
        settings.max_iterations = iterations;
    }
    if let Some(crash_dir) = args.crash_dir {
        settings.crash_dir = crash_dir;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.timeout_ms = timeout_ms;
    }
    if let Some(seed) = args.overrides.seed {
        settings.seed = seed;
    }
    let mutation = apply_overrides(config.mutation, &args.overrides)?;

    let seed_input = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read seed {:?}", args.input))?;
    let mut executor = CommandExecutor::new(executor_config(&settings, args.target))?;
    let mut instance = MutatorInstance::with_config(settings.seed, mutation)?;

    let max_iterations = settings.max_iterations;
    println!(
        "Starting fuzz loop for {} iterations on a {}-byte seed ({} frames)...",
        max_iterations,
        seed_input.len(),
        seed_input.frame_count()
    );
    let start_time = Instant::now();
    let mut executions: u64 = 0;
    let mut timeouts: u64 = 0;
    let mut rejected: u64 = 0;
    let mut crashes: u64 = 0;
    let mut unique_crashes: HashSet<PathBuf> = HashSet::new();

    for i in 0..max_iterations {
        instance.mutate(&seed_input, usize::MAX);
        let mutated_input = instance.output().to_vec();
        let status = executor.execute_sync(&mutated_input);
        executions += 1;

        match status {
            ExecutionStatus::Ok => {}
            ExecutionStatus::Exited(code) => {
                debug!("Target rejected input with exit code {code}");
                rejected += 1;
            }
            ExecutionStatus::Timeout => timeouts += 1,
            ExecutionStatus::Crash(description) => {
                crashes += 1;
                let path = save_crash(&settings.crash_dir, &mutated_input)?;
                if unique_crashes.insert(path.clone()) {
                    println!("\n!!! CRASH FOUND (Execution {executions}) !!!");
                    println!("  Description: {description}");
                    println!("  Saved to: {}", path.display());
                }
            }
            ExecutionStatus::Other(message) => {
                warn!("Execution failed: {message}");
            }
        }

        if i > 0 && i % (max_iterations / 100).max(1) == 0 {
            let elapsed = start_time.elapsed().as_secs_f32();
            let exec_per_sec = if elapsed > 0.0 {
                executions as f32 / elapsed
            } else {
                0.0
            };
            print!(
                "\rIter: {}/{}, Crashes: {} ({} unique), Timeouts: {}, Execs/sec: {:.2}   ",
                i,
                max_iterations,
                crashes,
                unique_crashes.len(),
                timeouts,
                exec_per_sec
            );
            std::io::stdout().flush()?;
        }
    }

    let elapsed_total = start_time.elapsed();
    println!("\nFuzz loop finished in {elapsed_total:.2?}.");
    println!(
        "Total Executions: {}, Crashes: {} ({} unique), Timeouts: {}, Rejected: {}",
        executions,
        crashes,
        unique_crashes.len(),
        timeouts,
        rejected
    );
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(cli.config_file.as_deref())?;
    debug!("Effective configuration: {config:#?}");

    match cli.command {
        Command::Mutate(args) => mutate(args, &config),
        Command::Scan(args) => scan(args),
        Command::Run(args) => run(args, &config),
    }
}
