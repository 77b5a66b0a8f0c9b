//! Fixed worker pool for handlers that must not block the read loop.

use crate::log_debug;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::thread::{self, JoinHandle};

// Pending jobs beyond the workers themselves; overflow is rejected, not queued
// unboundedly, so a stuck backend cannot pile up work forever.
const JOB_QUEUE_CAPACITY: usize = 16;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = bounded::<Job>(JOB_QUEUE_CAPACITY);
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let rx = rx.clone();
            workers.push(thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            }));
        }
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Submit a job without blocking. Returns false when the queue is full or
    /// the pool is shutting down; the caller decides how to report that.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        match tx.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log_debug("worker pool queue full; job rejected");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the sender ends each worker's recv loop.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
