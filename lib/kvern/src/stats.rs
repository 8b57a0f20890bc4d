use serde::Serialize;

/// Outcome of one mapper's run.
#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub mapper_id: usize,
    pub files_read: usize,
    pub lines_in: u64,
    pub records_emitted: u64,
    pub wall_ms: u64,
}

/// Outcome of one reducer's run.
#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStats {
    pub reducer_id: usize,
    pub partition_files_read: usize,
    pub records_in: u64,
    pub keys_out: u64,
    pub wall_ms: u64,
}

/// Whole-run summary logged after a successful job.
#[derive(Default, Clone, Debug, Serialize)]
pub struct RunSummary {
    pub input_files: usize,
    pub mappers_run: usize,
    pub reducers_run: usize,
    pub total_lines: u64,
    pub total_records: u64,
    pub distinct_keys: u64,
    pub map_wall_ms: u64,
    pub reduce_wall_ms: u64,
    pub wall_ms: u64,
}

impl RunSummary {
    pub fn record_map(&mut self, per_mapper: &[MapStats], wall_ms: u64) {
        self.mappers_run = per_mapper.len();
        self.total_lines = per_mapper.iter().map(|s| s.lines_in).sum();
        self.total_records = per_mapper.iter().map(|s| s.records_emitted).sum();
        self.map_wall_ms = wall_ms;
    }

    pub fn record_reduce(&mut self, per_reducer: &[ReduceStats], wall_ms: u64) {
        self.reducers_run = per_reducer.len();
        self.reduce_wall_ms = wall_ms;
    }
}
