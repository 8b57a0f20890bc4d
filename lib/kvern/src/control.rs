//! Line-oriented control protocol between the controller and out-of-process
//! workers. Commands flow controller -> worker, `status:` lines flow back.
//! Messages are newline-terminated UTF-8 with whitespace-separated fields.

use crate::config::PoolConfig;
use crate::mapper::MapTask;
use crate::reducer::ReduceTask;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use tracing::trace;

/// Controller -> worker.
#[derive(Debug, Clone)]
pub enum Command {
    Map(MapTask),
    Reduce(ReduceTask),
    Heartbeat,
    Exit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Map(task) => {
                let (min, max) = task.pool.resolve();
                write!(
                    f,
                    "map {} {} {} {} {} {}",
                    task.temp_dir.display(),
                    task.mapper_id,
                    task.num_reducers,
                    min,
                    max,
                    log_path_field(&task.log_path),
                )?;
                for file in &task.files {
                    write!(f, " {}", file.display())?;
                }
                Ok(())
            }
            Command::Reduce(task) => {
                let (min, max) = task.pool.resolve();
                write!(
                    f,
                    "reduce {} {} {} {} {} {}",
                    task.output_dir.display(),
                    task.temp_dir.display(),
                    task.reducer_id,
                    min,
                    max,
                    log_path_field(&task.log_path),
                )
            }
            Command::Heartbeat => write!(f, "heartbeat"),
            Command::Exit => write!(f, "exit"),
        }
    }
}

fn log_path_field(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "-".to_string(),
    }
}

fn parse_log_path(field: &str) -> Option<PathBuf> {
    if field == "-" {
        None
    } else {
        Some(PathBuf::from(field))
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["heartbeat"] => Ok(Command::Heartbeat),
            ["exit"] => Ok(Command::Exit),
            ["map", temp_dir, mapper_id, num_reducers, min, max, log_path, files @ ..] => {
                if files.is_empty() {
                    bail!("map command carries no input files: {line}");
                }
                let mut task = MapTask::new(
                    PathBuf::from(*temp_dir),
                    parse_index(mapper_id, "mapperId")?,
                    parse_index(num_reducers, "R")?,
                    files.iter().map(|f| PathBuf::from(*f)).collect(),
                );
                task.pool = PoolConfig::new(
                    parse_index(min, "minThreads")?,
                    parse_index(max, "maxThreads")?,
                );
                task.log_path = parse_log_path(log_path);
                Ok(Command::Map(task))
            }
            ["reduce", output_dir, temp_dir, reducer_id, min, max, log_path] => {
                let mut task = ReduceTask::new(
                    PathBuf::from(*output_dir),
                    PathBuf::from(*temp_dir),
                    parse_index(reducer_id, "reducerId")?,
                );
                task.pool = PoolConfig::new(
                    parse_index(min, "minThreads")?,
                    parse_index(max, "maxThreads")?,
                );
                task.log_path = parse_log_path(log_path);
                Ok(Command::Reduce(task))
            }
            _ => bail!("malformed command: {line}"),
        }
    }
}

fn parse_index(field: &str, name: &str) -> Result<usize> {
    field
        .parse::<usize>()
        .with_context(|| format!("invalid {name}: {field}"))
}

/// Worker -> controller. The `status:` prefix is part of the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Alive,
    JobStarted,
    JobProcessing,
    JobCompleted,
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Alive => write!(f, "status:alive"),
            Status::JobStarted => write!(f, "status:job started"),
            Status::JobProcessing => write!(f, "status:job processing"),
            Status::JobCompleted => write!(f, "status:job completed"),
            Status::Error(text) => write!(f, "status:error {text}"),
        }
    }
}

impl Status {
    pub fn parse(line: &str) -> Result<Status> {
        let body = line
            .strip_prefix("status:")
            .with_context(|| format!("not a status line: {line}"))?;
        match body {
            "alive" => Ok(Status::Alive),
            "job started" => Ok(Status::JobStarted),
            "job processing" => Ok(Status::JobProcessing),
            "job completed" => Ok(Status::JobCompleted),
            _ => match body.strip_prefix("error") {
                Some(text) => Ok(Status::Error(text.trim_start().to_string())),
                None => bail!("unknown status: {line}"),
            },
        }
    }
}

/// One newline-delimited TCP link to a peer.
pub struct ControlChannel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr().context("peer address")?;
        let writer = stream.try_clone().context("clone control stream")?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            peer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        self.send_line(&command.to_string())
    }

    pub fn send_status(&mut self, status: &Status) -> Result<()> {
        self.send_line(&status.to_string())
    }

    /// Next command from the controller; `None` when the peer hung up.
    pub fn recv_command(&mut self) -> Result<Option<Command>> {
        match self.recv_line()? {
            Some(line) => Command::parse(&line).map(Some),
            None => Ok(None),
        }
    }

    /// Next status from the worker. Connection loss is an error here: the
    /// controller treats it as worker failure.
    pub fn recv_status(&mut self) -> Result<Status> {
        match self.recv_line()? {
            Some(line) => Status::parse(&line),
            None => bail!("control connection to {} lost", self.peer),
        }
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(peer = %self.peer, line, "control send");
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .with_context(|| format!("send to {}", self.peer))
    }

    fn recv_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .with_context(|| format!("receive from {}", self.peer))?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        trace!(peer = %self.peer, line = %line, "control recv");
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_command_round_trips() {
        let mut task = MapTask::new("/tmp/mr", 1, 4, vec!["/in/a.txt".into(), "/in/b.txt".into()]);
        task.pool = PoolConfig::new(2, 4);
        task.log_path = Some("/tmp/mr/mapper1.log".into());
        let line = Command::Map(task).to_string();
        assert_eq!(
            line,
            "map /tmp/mr 1 4 2 4 /tmp/mr/mapper1.log /in/a.txt /in/b.txt"
        );
        match Command::parse(&line).unwrap() {
            Command::Map(parsed) => {
                assert_eq!(parsed.mapper_id, 1);
                assert_eq!(parsed.num_reducers, 4);
                assert_eq!(parsed.pool, PoolConfig::new(2, 4));
                assert_eq!(parsed.files.len(), 2);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn reduce_command_round_trips() {
        let mut task = ReduceTask::new("/out", "/tmp/mr", 2);
        task.pool = PoolConfig::new(1, 3);
        let line = Command::Reduce(task).to_string();
        assert_eq!(line, "reduce /out /tmp/mr 2 1 3 -");
        match Command::parse(&line).unwrap() {
            Command::Reduce(parsed) => {
                assert_eq!(parsed.reducer_id, 2);
                assert!(parsed.log_path.is_none());
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("map /tmp 0 1 2 4 log.txt").is_err());
        assert!(Command::parse("reduce /out /tmp notanumber 1 2 -").is_err());
        assert!(Command::parse("shuffle now").is_err());
    }

    #[test]
    fn status_lines_round_trip() {
        for status in [
            Status::Alive,
            Status::JobStarted,
            Status::JobProcessing,
            Status::JobCompleted,
            Status::Error("partition write failed".into()),
        ] {
            assert_eq!(Status::parse(&status.to_string()).unwrap(), status);
        }
        assert!(Status::parse("alive").is_err());
        assert!(Status::parse("status:resting").is_err());
    }
}
