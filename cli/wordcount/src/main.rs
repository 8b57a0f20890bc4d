use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kvern::runner::{ControlListener, LocalRunner, WorkerRunner};
use kvern::{JobConfig, MapTask, Orchestrator, PoolConfig, ReduceTask};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "wordcount", version, about = "MapReduce word count over a directory of text files")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Drive a whole run: distribute inputs, map, reduce, aggregate.
    Controller(ControllerArgs),
    /// Run a single mapper over its assigned input files.
    Mapper(MapperArgs),
    /// Run a single reducer over its partition.
    Reducer(ReducerArgs),
    /// Connect to a controller and serve map/reduce commands.
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct ControllerArgs {
    input_dir: PathBuf,
    output_dir: PathBuf,
    temp_dir: PathBuf,
    /// Number of mappers (M), must be positive.
    num_mappers: usize,
    /// Number of reducers (R), must be positive.
    num_reducers: usize,
    /// Mapper pool bounds; zero resolves to the host parallelism.
    map_min: Option<usize>,
    map_max: Option<usize>,
    /// Reducer pool bounds.
    red_min: Option<usize>,
    red_max: Option<usize>,
    /// Append the controller log to this file instead of stderr.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Drive out-of-process workers: listen here for them to connect.
    #[arg(long)]
    listen: Option<String>,
    /// How many remote workers to wait for (defaults to max(M, R)).
    #[arg(long, requires = "listen")]
    workers: Option<usize>,
    /// Delete the temp dir after the success marker is written.
    #[arg(long)]
    clean_temp: bool,
    /// Success marker file name.
    #[arg(long)]
    success_file: Option<String>,
    /// Final aggregated output file name.
    #[arg(long)]
    final_output: Option<String>,
}

#[derive(Args, Debug)]
struct MapperArgs {
    temp_dir: PathBuf,
    mapper_id: usize,
    /// Number of reducers (R): how many partitions to write.
    num_reducers: usize,
    /// Input files assigned to this mapper.
    #[arg(required = true)]
    input_files: Vec<PathBuf>,
    #[arg(long, default_value_t = 0)]
    pool_min: usize,
    #[arg(long, default_value_t = 0)]
    pool_max: usize,
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReducerArgs {
    output_dir: PathBuf,
    temp_dir: PathBuf,
    reducer_id: usize,
    #[arg(long, default_value_t = 0)]
    pool_min: usize,
    #[arg(long, default_value_t = 0)]
    pool_max: usize,
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Controller address to connect to, e.g. 127.0.0.1:54000.
    addr: String,
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.mode {
        Mode::Controller(args) => run_controller(args),
        Mode::Mapper(args) => run_mapper(args),
        Mode::Reducer(args) => run_reducer(args),
        Mode::Worker(args) => run_worker(args),
    }
}

fn run_controller(args: ControllerArgs) -> Result<()> {
    init_logging(args.log.as_deref())?;
    let mut config = JobConfig::new(
        args.input_dir,
        args.output_dir,
        args.temp_dir,
        args.num_mappers,
        args.num_reducers,
    );
    config.mapper_pool = PoolConfig::new(args.map_min.unwrap_or(0), args.map_max.unwrap_or(0));
    config.reducer_pool = PoolConfig::new(args.red_min.unwrap_or(0), args.red_max.unwrap_or(0));
    config.clean_temp = args.clean_temp;
    if let Some(name) = args.success_file {
        config.success_file_name = name;
    }
    if let Some(name) = args.final_output {
        config.final_output_name = name;
    }

    let runner: Box<dyn WorkerRunner> = match &args.listen {
        Some(addr) => {
            let expected = args
                .workers
                .unwrap_or_else(|| args.num_mappers.max(args.num_reducers));
            Box::new(ControlListener::bind(addr.as_str())?.accept_workers(expected)?)
        }
        None => Box::new(LocalRunner),
    };

    let mut orchestrator = Orchestrator::new(config)?;
    let outcome = orchestrator.run(runner.as_ref());
    runner.shutdown();
    outcome.map(|_| ())
}

fn run_mapper(args: MapperArgs) -> Result<()> {
    init_logging(args.log.as_deref())?;
    let mut task = MapTask::new(
        args.temp_dir,
        args.mapper_id,
        args.num_reducers,
        args.input_files,
    );
    task.pool = PoolConfig::new(args.pool_min, args.pool_max);
    kvern::run_map(&task).map(|_| ())
}

fn run_reducer(args: ReducerArgs) -> Result<()> {
    init_logging(args.log.as_deref())?;
    let mut task = ReduceTask::new(args.output_dir, args.temp_dir, args.reducer_id);
    task.pool = PoolConfig::new(args.pool_min, args.pool_max);
    kvern::run_reduce(&task).map(|_| ())
}

fn run_worker(args: WorkerArgs) -> Result<()> {
    init_logging(args.log.as_deref())?;
    kvern::worker::run_worker(args.addr.as_str())
}

fn init_logging(log_path: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
