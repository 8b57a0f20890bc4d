use crate::config::JobConfig;
use crate::io;
use crate::mapper::MapTask;
use crate::reducer::ReduceTask;
use crate::runner::WorkerRunner;
use crate::stats::{MapStats, ReduceStats, RunSummary};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

/// States of one controller run. Transitions are strictly forward, with
/// `Failed` reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    DirsReady,
    Distributed,
    MapLaunched,
    MapDone,
    ReduceLaunched,
    ReduceDone,
    Aggregated,
    Success,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::DirsReady => "DIRS_READY",
            Phase::Distributed => "DISTRIBUTED",
            Phase::MapLaunched => "MAP_LAUNCHED",
            Phase::MapDone => "MAP_DONE",
            Phase::ReduceLaunched => "REDUCE_LAUNCHED",
            Phase::ReduceDone => "REDUCE_DONE",
            Phase::Aggregated => "AGGREGATED",
            Phase::Success => "SUCCESS",
            Phase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Top-level driver: directory setup, file distribution, worker launch,
/// barriers, final aggregation, success marker.
pub struct Orchestrator {
    config: JobConfig,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(config: JobConfig) -> Result<Self> {
        if config.num_mappers == 0 {
            bail!("number of mappers must be positive");
        }
        if config.num_reducers == 0 {
            bail!("number of reducers must be positive");
        }
        Ok(Self {
            config,
            phase: Phase::Init,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Drives the run to `Success` or `Failed`.
    pub fn run(&mut self, runner: &dyn WorkerRunner) -> Result<RunSummary> {
        let outcome = self.try_run(runner);
        if let Err(e) = &outcome {
            error!(phase = %self.phase, error = %format!("{e:#}"), "run failed");
            self.phase = Phase::Failed;
        }
        outcome
    }

    fn try_run(&mut self, runner: &dyn WorkerRunner) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::default();
        if let Some(limit) = fd_soft_limit() {
            info!(fd_soft_limit = limit, "controller starting");
        } else {
            info!("controller starting");
        }

        // INIT -> DIRS_READY: the input dir must pre-exist, the others are
        // created on demand.
        io::validate_directory(&self.config.input_dir, false)
            .with_context(|| format!("input dir {}", self.config.input_dir.display()))?;
        io::validate_directory(&self.config.output_dir, true)
            .with_context(|| format!("output dir {}", self.config.output_dir.display()))?;
        io::validate_directory(&self.config.temp_dir, true)
            .with_context(|| format!("temp dir {}", self.config.temp_dir.display()))?;
        self.enter(Phase::DirsReady);

        // DIRS_READY -> DISTRIBUTED: round-robin file assignment.
        let inputs = io::list_files(&self.config.input_dir, "txt")
            .with_context(|| format!("enumerate {}", self.config.input_dir.display()))?;
        summary.input_files = inputs.len();
        let assignments = distribute(&inputs, self.config.num_mappers);
        self.enter(Phase::Distributed);

        if inputs.is_empty() {
            // Nothing to map: the run succeeds with empty outputs.
            warn!(input_dir = %self.config.input_dir.display(), "no input files found");
            io::write_sorted_kv(self.config.final_output_path(), &BTreeMap::new())?;
            io::create_empty_file(self.config.success_path())
                .context("write success marker")?;
            self.enter(Phase::Success);
            summary.wall_ms = start.elapsed().as_millis() as u64;
            self.log_summary(&summary);
            return Ok(summary);
        }

        // DISTRIBUTED -> MAP_LAUNCHED -> MAP_DONE: barrier on all mappers.
        self.enter(Phase::MapLaunched);
        let map_start = Instant::now();
        let map_stats = self.run_map_phase(runner, assignments)?;
        summary.record_map(&map_stats, map_start.elapsed().as_millis() as u64);
        self.enter(Phase::MapDone);

        // MAP_DONE -> REDUCE_LAUNCHED -> REDUCE_DONE: reducers start only
        // after the map barrier, never early.
        self.enter(Phase::ReduceLaunched);
        let reduce_start = Instant::now();
        let reduce_stats = self.run_reduce_phase(runner)?;
        summary.record_reduce(&reduce_stats, reduce_start.elapsed().as_millis() as u64);
        self.enter(Phase::ReduceDone);

        // REDUCE_DONE -> AGGREGATED: concatenate reducer outputs. The merge
        // tolerates repeated keys even though the partitioner never emits
        // them to two reducers.
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for r in 0..self.config.num_reducers {
            let path = self.config.reducer_output_path(r);
            let pairs = io::read_kv_pairs(&path)
                .with_context(|| format!("read reducer output {}", path.display()))?;
            for (key, count) in pairs {
                *totals.entry(key).or_insert(0) += count;
            }
        }
        summary.distinct_keys = totals.len() as u64;
        io::write_sorted_kv(self.config.final_output_path(), &totals)
            .context("write final output")?;
        self.enter(Phase::Aggregated);

        // AGGREGATED -> SUCCESS: the marker certifies everything before it.
        io::create_empty_file(self.config.success_path()).context("write success marker")?;
        self.enter(Phase::Success);

        if self.config.clean_temp {
            if let Err(e) = std::fs::remove_dir_all(&self.config.temp_dir) {
                warn!(temp_dir = %self.config.temp_dir.display(), error = %e, "temp cleanup failed");
            }
        }

        summary.wall_ms = start.elapsed().as_millis() as u64;
        self.log_summary(&summary);
        Ok(summary)
    }

    fn run_map_phase(
        &self,
        runner: &dyn WorkerRunner,
        assignments: Vec<Vec<PathBuf>>,
    ) -> Result<Vec<MapStats>> {
        let mut stats = Vec::new();
        let results: Vec<(usize, Result<Option<MapStats>>)> = thread::scope(|scope| {
            let mut handles = Vec::new();
            for (mapper_id, files) in assignments.into_iter().enumerate() {
                if files.is_empty() {
                    // An empty assignment would produce zero partition bytes.
                    info!(mapper = mapper_id, "skipping mapper with no files");
                    continue;
                }
                let mut task = MapTask::new(
                    self.config.temp_dir.clone(),
                    mapper_id,
                    self.config.num_reducers,
                    files,
                );
                task.pool = self.config.mapper_pool;
                task.partition_prefix = self.config.partition_prefix.clone();
                task.partition_suffix = self.config.partition_suffix.clone();
                info!(mapper = mapper_id, files = task.files.len(), "launching mapper");
                handles.push((mapper_id, scope.spawn(move || runner.run_map(task))));
            }
            handles
                .into_iter()
                .map(|(id, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("mapper {id} thread panicked")));
                    (id, result)
                })
                .collect()
        });
        for (mapper_id, result) in results {
            match result {
                Ok(Some(s)) => stats.push(s),
                Ok(None) => {}
                Err(e) => return Err(e.context(format!("mapper {mapper_id} failed"))),
            }
        }
        Ok(stats)
    }

    fn run_reduce_phase(&self, runner: &dyn WorkerRunner) -> Result<Vec<ReduceStats>> {
        let mut stats = Vec::new();
        let results: Vec<(usize, Result<Option<ReduceStats>>)> = thread::scope(|scope| {
            let mut handles = Vec::new();
            for reducer_id in 0..self.config.num_reducers {
                let mut task = ReduceTask::new(
                    self.config.output_dir.clone(),
                    self.config.temp_dir.clone(),
                    reducer_id,
                );
                task.pool = self.config.reducer_pool;
                task.partition_prefix = self.config.partition_prefix.clone();
                task.partition_suffix = self.config.partition_suffix.clone();
                info!(reducer = reducer_id, "launching reducer");
                handles.push((reducer_id, scope.spawn(move || runner.run_reduce(task))));
            }
            handles
                .into_iter()
                .map(|(id, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("reducer {id} thread panicked")));
                    (id, result)
                })
                .collect()
        });
        for (reducer_id, result) in results {
            match result {
                Ok(Some(s)) => stats.push(s),
                Ok(None) => {}
                Err(e) => return Err(e.context(format!("reducer {reducer_id} failed"))),
            }
        }
        Ok(stats)
    }

    fn enter(&mut self, next: Phase) {
        info!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }

    fn log_summary(&self, summary: &RunSummary) {
        match serde_json::to_string(summary) {
            Ok(json) => info!(summary = %json, "run complete"),
            Err(e) => warn!(error = %e, "run summary not serializable"),
        }
    }
}

/// Round-robin assignment: file `i` goes to mapper `i mod M`.
fn distribute(files: &[PathBuf], num_mappers: usize) -> Vec<Vec<PathBuf>> {
    let mut assignments = vec![Vec::new(); num_mappers];
    for (i, file) in files.iter().enumerate() {
        assignments[i % num_mappers].push(file.clone());
    }
    assignments
}

#[cfg(target_os = "linux")]
fn fd_soft_limit() -> Option<u64> {
    use libc::{getrlimit, rlimit, RLIMIT_NOFILE};
    let mut lim = rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { getrlimit(RLIMIT_NOFILE, &mut lim as *mut rlimit) };
    if rc == 0 {
        Some(lim.rlim_cur as u64)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn fd_soft_limit() -> Option<u64> {
    None
}
