//! Single-host MapReduce word-count engine.
//!
//! A controller partitions `.txt` inputs across mapper workers, gates
//! reducers on the map barrier, and aggregates hash-partitioned outputs.
//! Workers run either as in-process threads or as separate processes driven
//! over a line-oriented TCP control plane.

pub mod config;
pub mod control;
pub mod io;
pub mod mapper;
pub mod normalize;
pub mod orchestrator;
pub mod partition;
pub mod pool;
pub mod reducer;
pub mod runner;
pub mod stats;
pub mod worker;

pub use config::{JobConfig, PoolConfig};
pub use mapper::{run_map, MapTask};
pub use orchestrator::{Orchestrator, Phase};
pub use reducer::{run_reduce, ReduceTask};
pub use runner::{ControlListener, LocalRunner, RemoteRunner, WorkerRunner};
