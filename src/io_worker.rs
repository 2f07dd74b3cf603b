use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::thread;
use std::thread::JoinHandle;

use log::debug;
use log::warn;

use crate::error::KarismaError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Dedicated thread that runs blocking bus transfers in submission order.
pub struct IoWorker {
    name: String,
    jobs: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

/// Result of a job submitted to an [`IoWorker`].
pub struct Pending<R> {
    worker: String,
    result: Receiver<R>,
}

impl<R> Pending<R> {
    pub fn wait(self) -> Result<R, KarismaError> {
        self.result
            .recv()
            .map_err(|_| KarismaError::WorkerGone(self.worker))
    }
}

impl IoWorker {
    pub fn spawn<S: Into<String>>(name: S) -> Result<IoWorker, std::io::Error> {
        let name = name.into();
        let (jobs, queue) = mpsc::channel::<Job>();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            for job in queue {
                job();
            }
        })?;
        debug!("Spawned I/O worker '{}'", name);
        Ok(IoWorker {
            name,
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    pub fn submit<F, R>(&self, job: F) -> Pending<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            // the submitter may have stopped waiting
            let _ = tx.send(job());
        });
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_err() {
                warn!("I/O worker '{}' is not accepting jobs", self.name);
            }
        }
        Pending {
            worker: self.name.clone(),
            result: rx,
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        // closing the queue ends the worker loop
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("I/O worker '{}' panicked", self.name);
            }
        }
    }
}
