use crate::config::PoolConfig;
use anyhow::{bail, Result};
use crossbeam_channel as channel;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Elastic pool of worker threads executing submitted closures.
///
/// Starts with `min` workers and grows one worker at a time, up to `max`,
/// whenever a submission finds the queue deeper than the live worker count.
/// Idle workers stay around until shutdown. A panicking task is logged and
/// the worker keeps running.
pub struct WorkerPool {
    sender: Mutex<Option<channel::Sender<Task>>>,
    receiver: channel::Receiver<Task>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: Arc<AtomicUsize>,
    shutting_down: AtomicBool,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(cfg: PoolConfig) -> Self {
        let (min, max) = cfg.resolve();
        debug!(min, max, "worker pool starting");
        let (sender, receiver) = channel::unbounded::<Task>();
        let pool = Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            handles: Mutex::new(Vec::with_capacity(max)),
            workers: Arc::new(AtomicUsize::new(0)),
            shutting_down: AtomicBool::new(false),
            max_workers: max,
        };
        for _ in 0..min {
            pool.spawn_worker();
        }
        pool
    }

    /// Enqueues a task. Fails only when the pool is shutting down.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock().expect("pool sender lock");
        let sender = match guard.as_ref() {
            Some(s) if !self.shutting_down.load(Ordering::SeqCst) => s,
            _ => bail!("worker pool is shutting down; task rejected"),
        };
        sender
            .send(Box::new(task))
            .map_err(|_| anyhow::anyhow!("worker pool queue closed"))?;
        // Grow while the backlog outruns the workers.
        if self.receiver.len() > self.workers.load(Ordering::SeqCst)
            && self.workers.load(Ordering::SeqCst) < self.max_workers
        {
            self.spawn_worker();
        }
        Ok(())
    }

    /// Blocks until every accepted task has finished. Idempotent; later
    /// submissions are rejected.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        // Dropping the sender lets workers drain the queue and exit.
        self.sender.lock().expect("pool sender lock").take();
        let mut handles = self.handles.lock().expect("pool handles lock");
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked outside a task");
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub fn queue_depth(&self) -> usize {
        self.receiver.len()
    }

    fn spawn_worker(&self) {
        let receiver = self.receiver.clone();
        let workers = Arc::clone(&self.workers);
        let id = workers.fetch_add(1, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name(format!("pool-worker-{}", id))
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                        let msg = panic_message(&payload);
                        error!(worker = id, panic = %msg, "task panicked; worker continues");
                    }
                }
            })
            .expect("spawn pool worker");
        self.handles.lock().expect("pool handles lock").push(handle);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
