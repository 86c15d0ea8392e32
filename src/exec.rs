//! Bounded execution gate for blocking engine calls.
//!
//! Every open/execute/bulk-load runs as a job on a fixed set of named worker
//! threads; callers block on the job's result channel rather than executing
//! engine I/O themselves. Worker panics are caught so one bad job never takes
//! the gate down.

use crate::{Result, TimeshardError};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Job(Job),
    Shutdown,
}

/// A completed-or-pending gate task; [`wait`](Self::wait) blocks for the
/// result. No implicit timeout is applied.
pub struct Pending<T> {
    label: &'static str,
    receiver: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    pub fn wait(self) -> Result<T> {
        match self.receiver.recv() {
            Ok(result) => result,
            // The job dropped its sender without replying: it panicked.
            Err(_) => Err(TimeshardError::TaskPanicked {
                task: self.label.to_string(),
            }),
        }
    }
}

/// Bounded pool of worker threads executing engine jobs.
pub struct Gate {
    workers: Vec<Worker>,
    sender: Sender<Message>,
    closing: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    /// Set when no worker thread could be spawned; jobs then run inline on
    /// the submitting thread so the gate still makes progress.
    inline: bool,
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Gate {
    /// Creates a gate with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            warn!("Gate::new called with 0 workers; defaulting to 1");
            1
        } else {
            workers
        };

        let queue_capacity = workers.saturating_mul(2).max(1);
        let (sender, receiver) = bounded::<Message>(queue_capacity);
        let closing = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut spawned = Vec::with_capacity(workers);
        for id in 0..workers {
            let receiver = receiver.clone();
            let in_flight = Arc::clone(&in_flight);
            let thread = thread::Builder::new()
                .name(format!("timeshard-io-{id}"))
                .spawn(move || {
                    debug!("gate worker {id} started");
                    loop {
                        let message = match receiver.recv_timeout(Duration::from_millis(100)) {
                            Ok(message) => message,
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        };
                        match message {
                            Message::Job(job) => {
                                let outcome =
                                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                                in_flight.fetch_sub(1, Ordering::AcqRel);
                                if outcome.is_err() {
                                    error!("gate worker {id} caught a panicking job");
                                }
                            }
                            Message::Shutdown => {
                                debug!("gate worker {id} shutting down");
                                break;
                            }
                        }
                    }
                });
            match thread {
                Ok(thread) => spawned.push(Worker {
                    id,
                    thread: Some(thread),
                }),
                Err(err) => {
                    error!("failed to spawn gate worker {id}: {err}");
                    break;
                }
            }
        }

        let inline = spawned.is_empty();
        if inline {
            warn!("gate has no worker threads; jobs will run on submitting threads");
        }

        Self {
            workers: spawned,
            sender,
            closing,
            in_flight,
            inline,
        }
    }

    /// Creates a gate sized to the host's parallelism, capped at 8 workers.
    pub fn with_default_workers() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8);
        Self::new(workers)
    }

    /// Submits a job and returns a handle to await; `label` names the job in
    /// panic reports.
    pub fn submit<T, F>(&self, label: &'static str, job: F) -> Result<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if self.closing.load(Ordering::Acquire) {
            return Err(TimeshardError::ManagerClosed);
        }

        let (tx, rx) = bounded::<Result<T>>(1);
        let pending = Pending {
            label,
            receiver: rx,
        };

        if self.inline {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = tx.send(job());
            }));
            if outcome.is_err() {
                error!("inline gate job '{label}' panicked");
            }
            return Ok(pending);
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let boxed: Job = Box::new(move || {
            let _ = tx.send(job());
        });
        self.sender
            .send(Message::Job(boxed))
            .map_err(|_| TimeshardError::ChannelSend {
                channel: "gate".to_string(),
            })
            .inspect_err(|_| {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
            })?;
        Ok(pending)
    }

    /// Runs one job to completion.
    pub fn run<T, F>(&self, label: &'static str, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.submit(label, job)?.wait()
    }

    /// Fans out one job per element and joins them all, preserving input
    /// order. Individual failures stay in their slot; siblings are never
    /// cancelled.
    pub fn run_all<T, F>(&self, label: &'static str, jobs: Vec<F>) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let pending: Vec<Result<Pending<T>>> = jobs
            .into_iter()
            .map(|job| self.submit(label, job))
            .collect();
        pending
            .into_iter()
            .map(|submitted| submitted.and_then(Pending::wait))
            .collect()
    }

    /// Jobs queued or currently running.
    pub fn active_jobs(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
        // Drain queued jobs so no submitted work is silently dropped.
        while self.in_flight.load(Ordering::Acquire) > 0 {
            thread::sleep(Duration::from_millis(10));
        }
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    error!("gate worker {} panicked during shutdown", worker.id);
                }
            }
        }
        if !self.workers.is_empty() {
            info!("gate shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_job_result() {
        let gate = Gate::new(2);
        let value = gate.run("add", || Ok(40 + 2)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn jobs_execute_on_gate_threads() {
        let gate = Gate::new(1);
        let name = gate
            .run("whoami", || {
                Ok(thread::current().name().unwrap_or("").to_string())
            })
            .unwrap();
        assert!(name.starts_with("timeshard-io-"), "ran on {name}");
    }

    #[test]
    fn run_all_preserves_order_and_isolates_failures() {
        let gate = Gate::new(2);
        let jobs: Vec<Box<dyn FnOnce() -> Result<usize> + Send>> = vec![
            Box::new(|| Ok(1)),
            Box::new(|| {
                Err(TimeshardError::Staging("boom".to_string()))
            }),
            Box::new(|| Ok(3)),
        ];
        let results = gate.run_all("mixed", jobs);
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[test]
    fn panicking_job_surfaces_as_error_and_gate_survives() {
        let gate = Gate::new(1);
        let err = gate.run::<(), _>("kaboom", || panic!("kaboom")).unwrap_err();
        assert!(matches!(err, TimeshardError::TaskPanicked { .. }));
        // The worker thread must still accept new jobs.
        assert_eq!(gate.run("after", || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn heavy_fanout_completes() {
        let gate = Gate::new(2);
        let jobs: Vec<_> = (0..64)
            .map(|i| {
                move || {
                    thread::sleep(Duration::from_millis(1));
                    Ok(i)
                }
            })
            .collect();
        let results = gate.run_all("fanout", jobs);
        let sum: usize = results.into_iter().map(|r| r.unwrap()).sum();
        assert_eq!(sum, (0..64).sum::<usize>());
    }
}
