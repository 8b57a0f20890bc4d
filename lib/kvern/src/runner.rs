//! The orchestrator launches workers through this capability: in-process
//! threads or remote peers over the control plane, same contract either way.

use crate::control::{Command, ControlChannel, Status};
use crate::mapper::{self, MapTask};
use crate::reducer::{self, ReduceTask};
use crate::stats::{MapStats, ReduceStats};
use anyhow::{bail, Context, Result};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

pub trait WorkerRunner: Send + Sync {
    /// Runs one map task to completion. Remote execution yields no stats.
    fn run_map(&self, task: MapTask) -> Result<Option<MapStats>>;

    /// Runs one reduce task to completion.
    fn run_reduce(&self, task: ReduceTask) -> Result<Option<ReduceStats>>;

    /// Releases workers after the run. Local execution has nothing to do.
    fn shutdown(&self);
}

/// Executes tasks on the calling thread, inside the controller process.
pub struct LocalRunner;

impl WorkerRunner for LocalRunner {
    fn run_map(&self, task: MapTask) -> Result<Option<MapStats>> {
        mapper::run_map(&task).map(Some)
    }

    fn run_reduce(&self, task: ReduceTask) -> Result<Option<ReduceStats>> {
        reducer::run_reduce(&task).map(Some)
    }

    fn shutdown(&self) {}
}

/// Accept side of the control plane. Bind first so callers can learn the
/// ephemeral address before workers dial in.
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("bind control listener")?;
        info!(addr = %listener.local_addr()?, "control plane listening");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("control listener address")
    }

    /// Accepts `expected` workers and heartbeats each before any dispatch.
    pub fn accept_workers(self, expected: usize) -> Result<RemoteRunner> {
        if expected == 0 {
            bail!("remote execution needs at least one worker");
        }
        let mut channels = Vec::with_capacity(expected);
        for slot in 0..expected {
            let (stream, peer) = self.listener.accept().context("accept worker")?;
            stream.set_nodelay(true).ok();
            let mut channel = ControlChannel::new(stream)?;
            channel.send_command(&Command::Heartbeat)?;
            match channel.recv_status()? {
                Status::Alive => info!(worker = slot, %peer, "worker connected and alive"),
                other => bail!("worker {peer} failed its heartbeat: {other:?}"),
            }
            channels.push(Mutex::new(channel));
        }
        Ok(RemoteRunner { channels })
    }
}

/// Drives out-of-process workers over the control plane. Task `id mod N`
/// selects the worker; one command is in flight per channel at a time.
pub struct RemoteRunner {
    channels: Vec<Mutex<ControlChannel>>,
}

impl RemoteRunner {
    pub fn worker_count(&self) -> usize {
        self.channels.len()
    }

    fn dispatch(&self, slot: usize, command: &Command) -> Result<()> {
        let mut channel = self.channels[slot % self.channels.len()]
            .lock()
            .expect("control channel lock");
        channel.send_command(command)?;
        loop {
            match channel.recv_status()? {
                Status::JobCompleted => return Ok(()),
                Status::Error(text) => bail!("worker {} reported: {text}", channel.peer()),
                Status::JobStarted | Status::JobProcessing | Status::Alive => continue,
            }
        }
    }
}

impl WorkerRunner for RemoteRunner {
    fn run_map(&self, mut task: MapTask) -> Result<Option<MapStats>> {
        reject_unencodable(&task.temp_dir)?;
        for file in &task.files {
            reject_unencodable(file)?;
        }
        if task.log_path.is_none() {
            task.log_path = Some(task.temp_dir.join(format!("mapper{}.log", task.mapper_id)));
        }
        let slot = task.mapper_id;
        self.dispatch(slot, &Command::Map(task))?;
        Ok(None)
    }

    fn run_reduce(&self, mut task: ReduceTask) -> Result<Option<ReduceStats>> {
        reject_unencodable(&task.output_dir)?;
        reject_unencodable(&task.temp_dir)?;
        if task.log_path.is_none() {
            task.log_path = Some(task.temp_dir.join(format!("reducer{}.log", task.reducer_id)));
        }
        let slot = task.reducer_id;
        self.dispatch(slot, &Command::Reduce(task))?;
        Ok(None)
    }

    fn shutdown(&self) {
        for channel in &self.channels {
            let mut channel = channel.lock().expect("control channel lock");
            if let Err(e) = channel.send_command(&Command::Exit) {
                warn!(peer = %channel.peer(), error = %e, "exit command not delivered");
            }
        }
    }
}

/// The wire grammar is whitespace-separated; a path containing whitespace
/// cannot survive it.
fn reject_unencodable(path: &Path) -> Result<()> {
    if path.to_string_lossy().chars().any(|c| c.is_whitespace()) {
        bail!(
            "path {} contains whitespace and cannot cross the control plane",
            path.display()
        );
    }
    Ok(())
}
