use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use engine::sink::OutputSink;

/// Runs a spec-tree program to completion against an initial data file.
#[derive(Parser, Debug)]
#[command(name = "engine", author, version, about = "Dependency-graph task scheduler")]
struct Cli {
    /// Path to the spec-tree JSON file (spec.md §6 "Input program").
    #[arg(long)]
    spec: PathBuf,

    /// Path to the initial-data JSON file (spec.md §6 "Input data").
    #[arg(long)]
    data: PathBuf,

    /// Worker count; overrides config.yaml's `workers` when given.
    #[arg(long)]
    workers: Option<usize>,

    /// Map-expansion depth budget; overrides config.yaml's `level` when given.
    #[arg(long)]
    level: Option<i32>,

    /// Disable unreachable-task pruning, overriding config.yaml's `prune`.
    #[arg(long)]
    no_prune: bool,

    /// Output file for sink records; overrides config.yaml's `output`.
    /// Neither given means stdout.
    #[arg(long)]
    output: Option<String>,

    /// Buffer records in memory and print the merged aggregate (spec.md §6 /
    /// §10.6 "Aggregate read-back") to stdout instead of streaming records.
    #[arg(long)]
    aggregate: bool,
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt::fmt().pretty();
    let subscriber = subscriber.with_max_level(config::settings().logging.max_level);

    if let Some(log_file) = config::settings().logging.log_file.clone() {
        let file = std::fs::File::create(&log_file).expect("couldn't open log file");
        let subscriber = subscriber.with_writer(std::sync::Mutex::new(file)).finish();
        tracing::subscriber::set_global_default(subscriber).expect("couldn't set up tracing");
    } else {
        let subscriber = subscriber.finish();
        tracing::subscriber::set_global_default(subscriber).expect("couldn't set up tracing");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing();
    tracing::info!("tracing has been started");

    unsafe { backtrace_on_stack_overflow::enable() };

    if !config::settings().library_paths.is_empty() {
        tracing::warn!(
            paths = ?config::settings().library_paths,
            "library_paths is configured, but this registry resolves native functions \
             at link time (see crates/functions) and does not consult them"
        );
    }

    let workers = cli.workers.unwrap_or_else(|| config::settings().workers);
    let level = cli.level.unwrap_or_else(|| config::settings().level);
    let prune = if cli.no_prune {
        false
    } else {
        config::settings().prune
    };
    let output = cli.output.clone().or_else(|| config::settings().output.clone());

    let spec_json = std::fs::read_to_string(&cli.spec)
        .with_context(|| format!("reading spec file {}", cli.spec.display()))?;
    let spec: engine::Spec = serde_json::from_str(&spec_json)
        .with_context(|| format!("parsing spec file {}", cli.spec.display()))?;

    let data_json = std::fs::read_to_string(&cli.data)
        .with_context(|| format!("reading data file {}", cli.data.display()))?;
    let data: HashMap<String, engine::Res> = serde_json::from_str(&data_json)
        .with_context(|| format!("parsing data file {}", cli.data.display()))?;

    tracing::info!(workers, level, prune, spec = %cli.spec.display(), "starting run");

    if cli.aggregate {
        let sink = Arc::new(engine::sink::MemorySink::new());
        engine::run(
            spec,
            data,
            workers,
            level,
            prune,
            sink.clone() as Arc<dyn OutputSink>,
        )?;
        let aggregate = sink.aggregate();
        println!("{}", serde_json::to_string_pretty(&aggregate)?);
    } else {
        let sink: Arc<dyn OutputSink> = match output {
            Some(path) => Arc::new(
                engine::sink::FileSink::to_path(Path::new(&path))
                    .with_context(|| format!("opening output file {path}"))?,
            ),
            None => Arc::new(engine::sink::FileSink::to_stdout()),
        };
        engine::run(spec, data, workers, level, prune, sink)?;
    }

    tracing::info!("run complete");
    Ok(())
}
