use crate::config::{PoolConfig, DEFAULT_PARTITION_PREFIX, DEFAULT_PARTITION_SUFFIX};
use crate::io;
use crate::pool::WorkerPool;
use crate::stats::ReduceStats;
use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One reducer's assignment. Mirrors the `reduce` control-plane command.
#[derive(Debug, Clone)]
pub struct ReduceTask {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub reducer_id: usize,
    pub pool: PoolConfig,
    pub log_path: Option<PathBuf>,
    pub partition_prefix: String,
    pub partition_suffix: String,
}

impl ReduceTask {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        reducer_id: usize,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            temp_dir: temp_dir.into(),
            reducer_id,
            pool: PoolConfig::default(),
            log_path: None,
            partition_prefix: DEFAULT_PARTITION_PREFIX.to_string(),
            partition_suffix: DEFAULT_PARTITION_SUFFIX.to_string(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("result_partition{}.txt", self.reducer_id))
    }
}

/// Runs one reducer: collects its partition across all mappers, aggregates
/// counts in parallel chunks, and writes the sorted per-partition output.
pub fn run_reduce(task: &ReduceTask) -> Result<ReduceStats> {
    let start = Instant::now();
    // A missing temp dir means the map phase never happened; that is fatal.
    io::validate_directory(&task.temp_dir, false)
        .with_context(|| format!("temp dir {}", task.temp_dir.display()))?;

    let pattern = Regex::new(&format!(
        "^{}\\d+_partition{}{}$",
        regex::escape(&task.partition_prefix),
        task.reducer_id,
        regex::escape(&task.partition_suffix),
    ))
    .expect("partition file pattern");

    let mut partition_files = Vec::new();
    for entry in std::fs::read_dir(&task.temp_dir)
        .with_context(|| format!("list temp dir {}", task.temp_dir.display()))?
    {
        let entry = entry.with_context(|| format!("list temp dir {}", task.temp_dir.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().map_or(false, |n| pattern.is_match(n)) {
            partition_files.push(entry.path());
        }
    }
    partition_files.sort();

    let mut pairs: Vec<(String, u64)> = Vec::new();
    let mut files_read = 0;
    for path in &partition_files {
        // A single unreadable intermediate file is not fatal; its counts are
        // simply missing from the output.
        match io::read_kv_pairs(path) {
            Ok(mut file_pairs) => {
                files_read += 1;
                pairs.append(&mut file_pairs);
            }
            Err(e) => warn!(
                file = %path.display(),
                error = %e,
                "skipping unreadable intermediate file"
            ),
        }
    }
    let records_in = pairs.len() as u64;
    debug!(
        reducer = task.reducer_id,
        files = files_read,
        records = records_in,
        "reduce task starting"
    );

    pairs.par_sort();
    let pairs = Arc::new(pairs);

    let (_, threads) = task.pool.resolve();
    let chunk = aggregation_chunk(pairs.len(), threads);
    let pool = WorkerPool::new(task.pool);
    let totals: Arc<Mutex<HashMap<String, u64>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut offset = 0;
    while offset < pairs.len() {
        let end = (offset + chunk).min(pairs.len());
        let pairs = Arc::clone(&pairs);
        let totals = Arc::clone(&totals);
        pool.submit(move || {
            let mut local: HashMap<String, u64> = HashMap::new();
            for (key, count) in &pairs[offset..end] {
                *local.entry(key.clone()).or_insert(0) += count;
            }
            let mut totals = totals.lock().expect("reducer totals lock");
            for (key, count) in local {
                *totals.entry(key).or_insert(0) += count;
            }
        })?;
        offset = end;
    }
    pool.shutdown();

    let totals = totals.lock().expect("reducer totals lock");
    let sorted: BTreeMap<String, u64> = totals.iter().map(|(k, v)| (k.clone(), *v)).collect();
    drop(totals);

    io::validate_directory(&task.output_dir, true)?;
    let output_path = task.output_path();
    io::write_sorted_kv(&output_path, &sorted)
        .with_context(|| format!("write reducer output {}", output_path.display()))?;

    let stats = ReduceStats {
        reducer_id: task.reducer_id,
        partition_files_read: files_read,
        records_in,
        keys_out: sorted.len() as u64,
        wall_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        reducer = task.reducer_id,
        records = stats.records_in,
        keys = stats.keys_out,
        wall_ms = stats.wall_ms,
        "reduce task finished"
    );
    Ok(stats)
}

fn aggregation_chunk(total: usize, threads: usize) -> usize {
    let threads = threads.max(1);
    total.div_ceil(threads).max(256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn aggregates_its_partition_across_mappers() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("tmp");
        fs::create_dir(&temp).unwrap();
        fs::write(temp.join("mapper0_partition0.tmp"), "x: 2\ny: 1\n").unwrap();
        fs::write(temp.join("mapper1_partition0.tmp"), "y: 2\nx: 1\n").unwrap();
        // A different partition's file must be ignored.
        fs::write(temp.join("mapper0_partition1.tmp"), "z: 9\n").unwrap();
        // Unrelated temp files must be ignored too.
        fs::write(temp.join("scratch.tmp"), "w: 4\n").unwrap();

        let out = dir.path().join("out");
        let mut task = ReduceTask::new(&out, &temp, 0);
        task.pool = PoolConfig::new(1, 2);
        let stats = run_reduce(&task).unwrap();
        assert_eq!(stats.partition_files_read, 2);
        assert_eq!(stats.records_in, 4);

        let text = fs::read_to_string(out.join("result_partition0.txt")).unwrap();
        assert_eq!(text, "x: 3\ny: 3\n");
    }

    #[test]
    fn tolerates_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("tmp");
        fs::create_dir(&temp).unwrap();
        fs::write(
            temp.join("mapper0_partition0.tmp"),
            "alpha: 1\ngarbage-no-colon\nbeta: 2\n",
        )
        .unwrap();

        let out = dir.path().join("out");
        let task = ReduceTask::new(&out, &temp, 0);
        run_reduce(&task).unwrap();
        let text = fs::read_to_string(out.join("result_partition0.txt")).unwrap();
        assert_eq!(text, "alpha: 1\nbeta: 2\n");
    }

    #[test]
    fn writes_empty_output_when_nothing_matched() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("tmp");
        fs::create_dir(&temp).unwrap();
        let out = dir.path().join("out");
        let stats = run_reduce(&ReduceTask::new(&out, &temp, 3)).unwrap();
        assert_eq!(stats.partition_files_read, 0);
        let text = fs::read_to_string(out.join("result_partition3.txt")).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn missing_temp_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let task = ReduceTask::new(dir.path().join("out"), dir.path().join("nope"), 0);
        assert!(run_reduce(&task).is_err());
    }
}
