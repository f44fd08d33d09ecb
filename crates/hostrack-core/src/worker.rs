//! Background worker for long-running control-plane jobs.
//!
//! Jobs are fire-and-forget: each one runs on the worker thread and hands its
//! result to a completion callback on that same thread. The audio thread
//! never submits to or waits on the worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct WorkerState {
    pending: AtomicUsize,
    about_to_close: AtomicBool,
}

/// Handle to the worker thread. Dropping it skips queued jobs and joins.
pub struct Worker {
    name: String,
    job_tx: Option<Sender<(&'static str, Job)>>,
    state: Arc<WorkerState>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (job_tx, job_rx) = unbounded();
        let state = Arc::new(WorkerState {
            pending: AtomicUsize::new(0),
            about_to_close: AtomicBool::new(false),
        });
        let thread_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(job_rx, thread_state))
            .map_err(Error::WorkerSpawn)?;
        debug!(name = %name, "Worker started");
        Ok(Self {
            name,
            job_tx: Some(job_tx),
            state,
            thread: Some(thread),
        })
    }

    /// Queue `job`; `on_done` receives its result on the worker thread.
    pub fn submit<T, F, C>(&self, label: &'static str, job: F, on_done: C) -> Result<()>
    where
        T: 'static,
        F: FnOnce() -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        if self.is_about_to_close() {
            return Err(Error::AboutToClose);
        }
        let tx = self.job_tx.as_ref().ok_or(Error::WorkerStopped)?;
        self.state.pending.fetch_add(1, Ordering::AcqRel);
        let boxed: Job = Box::new(move || on_done(job()));
        tx.send((label, boxed)).map_err(|_| {
            self.state.pending.fetch_sub(1, Ordering::AcqRel);
            Error::WorkerStopped
        })
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    pub fn is_about_to_close(&self) -> bool {
        self.state.about_to_close.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn worker_loop(job_rx: Receiver<(&'static str, Job)>, state: Arc<WorkerState>) {
    while let Ok((label, job)) = job_rx.recv() {
        if state.about_to_close.load(Ordering::Acquire) {
            debug!(job = label, "Skipping job, worker closing");
        } else {
            debug!(job = label, "Running job");
            job();
        }
        state.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.state.about_to_close.store(true, Ordering::Release);
        drop(self.job_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(name = %self.name, "Worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}
