//! Out-of-process worker: dials the controller, executes `map`/`reduce`
//! commands in-process, and reports lifecycle status over the same link.

use crate::control::{Command, ControlChannel, Status};
use crate::mapper;
use crate::reducer;
use anyhow::{bail, Context, Result};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{error, info};

/// Connects to the controller and serves commands until `exit`.
///
/// A lost connection or a malformed command is an error: the process exits
/// non-zero and the controller marks the worker failed. A failing job is
/// reported with `status:error` and the worker keeps serving.
pub fn run_worker(addr: impl ToSocketAddrs) -> Result<()> {
    let stream = TcpStream::connect(addr).context("connect to controller")?;
    stream.set_nodelay(true).ok();
    let mut channel = ControlChannel::new(stream)?;
    info!(controller = %channel.peer(), "worker connected");

    loop {
        let command = match channel.recv_command() {
            Ok(Some(command)) => command,
            Ok(None) => bail!("controller connection lost"),
            Err(e) => {
                let _ = channel.send_status(&Status::Error(flatten(&e)));
                return Err(e);
            }
        };
        match command {
            Command::Heartbeat => channel.send_status(&Status::Alive)?,
            Command::Exit => {
                info!("exit received, worker shutting down");
                return Ok(());
            }
            Command::Map(task) => {
                let mapper_id = task.mapper_id;
                run_job(&mut channel, move || {
                    mapper::run_map(&task).map(|stats| {
                        info!(mapper = mapper_id, records = stats.records_emitted, "map command done");
                    })
                })?;
            }
            Command::Reduce(task) => {
                let reducer_id = task.reducer_id;
                run_job(&mut channel, move || {
                    reducer::run_reduce(&task).map(|stats| {
                        info!(reducer = reducer_id, keys = stats.keys_out, "reduce command done");
                    })
                })?;
            }
        }
    }
}

fn run_job(channel: &mut ControlChannel, job: impl FnOnce() -> Result<()>) -> Result<()> {
    channel.send_status(&Status::JobStarted)?;
    channel.send_status(&Status::JobProcessing)?;
    match job() {
        Ok(()) => channel.send_status(&Status::JobCompleted),
        Err(e) => {
            error!(error = %flatten(&e), "job failed");
            channel.send_status(&Status::Error(flatten(&e)))
        }
    }
}

/// One-line rendering of an error chain; the wire format is line-oriented.
fn flatten(e: &anyhow::Error) -> String {
    format!("{e:#}").replace('\n', " ")
}
