use crate::config::{PoolConfig, DEFAULT_PARTITION_PREFIX, DEFAULT_PARTITION_SUFFIX};
use crate::io;
use crate::normalize::tokenize;
use crate::partition::partition;
use crate::pool::WorkerPool;
use crate::stats::MapStats;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info};

/// Smallest chunk of lines a single pool task will process.
const MIN_CHUNK_LINES: usize = 256;

/// One mapper's assignment. Mirrors the `map` control-plane command.
#[derive(Debug, Clone)]
pub struct MapTask {
    pub temp_dir: PathBuf,
    pub mapper_id: usize,
    pub num_reducers: usize,
    pub pool: PoolConfig,
    pub log_path: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub partition_prefix: String,
    pub partition_suffix: String,
}

impl MapTask {
    pub fn new(
        temp_dir: impl Into<PathBuf>,
        mapper_id: usize,
        num_reducers: usize,
        files: Vec<PathBuf>,
    ) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            mapper_id,
            num_reducers,
            pool: PoolConfig::default(),
            log_path: None,
            files,
            partition_prefix: DEFAULT_PARTITION_PREFIX.to_string(),
            partition_suffix: DEFAULT_PARTITION_SUFFIX.to_string(),
        }
    }

    fn partition_path(&self, reducer_id: usize) -> PathBuf {
        self.temp_dir.join(format!(
            "{}{}_partition{}{}",
            self.partition_prefix, self.mapper_id, reducer_id, self.partition_suffix
        ))
    }
}

/// Runs one mapper: reads the assigned files, counts normalized words in
/// parallel chunks, and appends each key to its partition file.
pub fn run_map(task: &MapTask) -> Result<MapStats> {
    let start = Instant::now();
    io::validate_directory(&task.temp_dir, true)?;

    // All R partition files are opened up front; any failure is critical.
    let mut writers = Vec::with_capacity(task.num_reducers);
    for r in 0..task.num_reducers {
        let path = task.partition_path(r);
        let file = File::create(&path)
            .with_context(|| format!("open partition file {}", path.display()))?;
        writers.push(Mutex::new(BufWriter::new(file)));
    }
    let writers = Arc::new(writers);

    let mut lines: Vec<String> = Vec::new();
    for file in &task.files {
        let mut file_lines = io::read_lines(file)
            .with_context(|| format!("read input file {}", file.display()))?;
        lines.append(&mut file_lines);
    }
    let total_lines = lines.len();
    let lines = Arc::new(lines);

    let (_, threads) = task.pool.resolve();
    let chunk = chunk_size(total_lines, threads);
    debug!(
        mapper = task.mapper_id,
        files = task.files.len(),
        lines = total_lines,
        threads,
        chunk,
        "map task starting"
    );

    let pool = WorkerPool::new(task.pool);
    let emitted = Arc::new(AtomicU64::new(0));
    let first_err: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

    let mut offset = 0;
    while offset < total_lines {
        let end = (offset + chunk).min(total_lines);
        let lines = Arc::clone(&lines);
        let writers = Arc::clone(&writers);
        let emitted = Arc::clone(&emitted);
        let first_err = Arc::clone(&first_err);
        let num_reducers = task.num_reducers;
        pool.submit(move || {
            let mut local: HashMap<String, u64> = HashMap::new();
            for line in &lines[offset..end] {
                for key in tokenize(line) {
                    *local.entry(key).or_insert(0) += 1;
                }
            }
            emitted.fetch_add(local.values().sum::<u64>(), Ordering::Relaxed);

            let mut buckets: Vec<Vec<(String, u64)>> = vec![Vec::new(); num_reducers];
            for (key, count) in local {
                let r = partition(&key, num_reducers);
                buckets[r].push((key, count));
            }
            for (r, bucket) in buckets.into_iter().enumerate() {
                if bucket.is_empty() {
                    continue;
                }
                let mut writer = writers[r].lock().expect("partition writer lock");
                for (key, count) in bucket {
                    if let Err(e) = writeln!(writer, "{}: {}", key, count) {
                        error!(partition = r, error = %e, "partition write failed");
                        let mut slot = first_err.lock().expect("mapper error slot");
                        if slot.is_none() {
                            *slot = Some(
                                anyhow::Error::from(e).context(format!("write partition {}", r)),
                            );
                        }
                        return;
                    }
                }
            }
        })?;
        offset = end;
    }

    pool.shutdown();

    // Close every partition file before surfacing any write failure.
    let mut close_err: Option<anyhow::Error> = None;
    for (r, writer) in writers.iter().enumerate() {
        let mut writer = writer.lock().expect("partition writer lock");
        if let Err(e) = writer.flush() {
            error!(partition = r, error = %e, "partition flush failed");
            if close_err.is_none() {
                close_err = Some(anyhow::Error::from(e).context(format!("flush partition {}", r)));
            }
        }
    }
    if let Some(e) = first_err.lock().expect("mapper error slot").take() {
        return Err(e);
    }
    if let Some(e) = close_err {
        return Err(e);
    }

    let stats = MapStats {
        mapper_id: task.mapper_id,
        files_read: task.files.len(),
        lines_in: total_lines as u64,
        records_emitted: emitted.load(Ordering::Relaxed),
        wall_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        mapper = task.mapper_id,
        lines = stats.lines_in,
        records = stats.records_emitted,
        wall_ms = stats.wall_ms,
        "map task finished"
    );
    Ok(stats)
}

/// `total / threads` clamped to a floor of `MIN_CHUNK_LINES`, keeping the
/// chunk count within `threads * 4`.
fn chunk_size(total: usize, threads: usize) -> usize {
    let threads = threads.max(1);
    let base = total.div_ceil(threads).max(MIN_CHUNK_LINES);
    base.max(total.div_ceil(threads * 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn chunk_size_respects_bounds() {
        assert_eq!(chunk_size(0, 4), 256);
        assert_eq!(chunk_size(100, 4), 256);
        // Large inputs divide across the threads.
        let c = chunk_size(100_000, 4);
        assert_eq!(c, 25_000);
        assert!(100_000usize.div_ceil(c) <= 16);
    }

    #[test]
    fn writes_partitioned_counts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.txt");
        fs::write(&input, "Hello, hello WORLD 123 world.\n").unwrap();
        let temp = dir.path().join("tmp");

        let mut task = MapTask::new(&temp, 0, 2, vec![input]);
        task.pool = PoolConfig::new(1, 2);
        let stats = run_map(&task).unwrap();
        assert_eq!(stats.lines_in, 1);
        assert_eq!(stats.records_emitted, 4);

        let mut pairs = Vec::new();
        for r in 0..2 {
            let path = temp.join(format!("mapper0_partition{}.tmp", r));
            for (key, count) in io::read_kv_pairs(&path).unwrap() {
                assert_eq!(partition(&key, 2), r);
                pairs.push((key, count));
            }
        }
        pairs.sort();
        assert_eq!(pairs, vec![("hello".to_string(), 2), ("world".to_string(), 2)]);
    }

    #[test]
    fn missing_input_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let task = MapTask::new(
            dir.path().join("tmp"),
            0,
            1,
            vec![dir.path().join("nope.txt")],
        );
        assert!(run_map(&task).is_err());
    }
}
