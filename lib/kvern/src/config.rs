use std::path::PathBuf;

/// Thread count chosen when the host's parallelism cannot be probed.
pub const FALLBACK_THREADS: usize = 2;

pub const DEFAULT_PARTITION_PREFIX: &str = "mapper";
pub const DEFAULT_PARTITION_SUFFIX: &str = ".tmp";
pub const DEFAULT_SUCCESS_FILE: &str = "_SUCCESS";
pub const DEFAULT_FINAL_OUTPUT: &str = "final_result.txt";

/// Worker pool bounds. Zero means "resolve to the host's parallelism".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min: 0, max: 0 }
    }
}

impl PoolConfig {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Resolved bounds: zeros become the available parallelism (fallback 2),
    /// and `max` is raised to `min` when the caller inverted them.
    pub fn resolve(&self) -> (usize, usize) {
        let auto = || {
            let n = num_cpus::get();
            if n == 0 {
                FALLBACK_THREADS
            } else {
                n
            }
        };
        let min = if self.min == 0 { auto() } else { self.min };
        let max = if self.max == 0 { min } else { self.max };
        (min, max.max(min))
    }
}

/// Immutable configuration for one MapReduce run.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub num_mappers: usize,
    pub num_reducers: usize,
    pub mapper_pool: PoolConfig,
    pub reducer_pool: PoolConfig,
    pub partition_prefix: String,
    pub partition_suffix: String,
    pub success_file_name: String,
    pub final_output_name: String,
    /// Delete `temp_dir` after the success marker is written.
    pub clean_temp: bool,
}

impl JobConfig {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        num_mappers: usize,
        num_reducers: usize,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            temp_dir: temp_dir.into(),
            num_mappers,
            num_reducers,
            mapper_pool: PoolConfig::default(),
            reducer_pool: PoolConfig::default(),
            partition_prefix: DEFAULT_PARTITION_PREFIX.to_string(),
            partition_suffix: DEFAULT_PARTITION_SUFFIX.to_string(),
            success_file_name: DEFAULT_SUCCESS_FILE.to_string(),
            final_output_name: DEFAULT_FINAL_OUTPUT.to_string(),
            clean_temp: false,
        }
    }

    /// `tempDir/mapper{m}_partition{r}.tmp`
    pub fn partition_path(&self, mapper_id: usize, reducer_id: usize) -> PathBuf {
        self.temp_dir.join(format!(
            "{}{}_partition{}{}",
            self.partition_prefix, mapper_id, reducer_id, self.partition_suffix
        ))
    }

    /// `outputDir/result_partition{r}.txt`
    pub fn reducer_output_path(&self, reducer_id: usize) -> PathBuf {
        self.output_dir
            .join(format!("result_partition{}.txt", reducer_id))
    }

    pub fn final_output_path(&self) -> PathBuf {
        self.output_dir.join(&self.final_output_name)
    }

    pub fn success_path(&self) -> PathBuf {
        self.output_dir.join(&self.success_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_maps_zero_to_parallelism() {
        let (min, max) = PoolConfig::new(0, 0).resolve();
        assert!(min >= 1);
        assert!(max >= min);
    }

    #[test]
    fn resolve_keeps_explicit_bounds() {
        assert_eq!(PoolConfig::new(2, 4).resolve(), (2, 4));
        // Inverted bounds collapse to min.
        assert_eq!(PoolConfig::new(4, 2).resolve(), (4, 4));
        // Zero max follows min.
        assert_eq!(PoolConfig::new(3, 0).resolve(), (3, 3));
    }

    #[test]
    fn paths_follow_the_layout() {
        let cfg = JobConfig::new("in", "out", "tmp", 2, 3);
        assert_eq!(
            cfg.partition_path(1, 2),
            PathBuf::from("tmp/mapper1_partition2.tmp")
        );
        assert_eq!(
            cfg.reducer_output_path(0),
            PathBuf::from("out/result_partition0.txt")
        );
        assert_eq!(cfg.success_path(), PathBuf::from("out/_SUCCESS"));
        assert_eq!(cfg.final_output_path(), PathBuf::from("out/final_result.txt"));
    }
}
