//! Fixed pool of worker endpoints.
//!
//! One rayon thread per endpoint; a thread only ever dispatches to its own
//! endpoint, so no worker runs two experiments at once. `run` returns when
//! every job of the batch is done, which is the generation barrier.

use std::sync::mpsc;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Dispatches jobs to worker endpoints and collects their results in input order.
pub struct WorkerPool {
    endpoints: Vec<String>,
    /// `None` with a single worker: jobs run on the calling thread.
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    pub fn new(endpoints: Vec<String>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = if endpoints.len() > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(endpoints.len())
                    .thread_name(|i| format!("worker-{i}"))
                    .build()?,
            )
        } else {
            None
        };
        Ok(Self { endpoints, pool })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Run `job` once per input and return the outputs in input order.
    ///
    /// Blocks until every job has finished.
    pub fn run<J, T, F>(&self, jobs: Vec<J>, job: F) -> Vec<T>
    where
        J: Send,
        T: Send,
        F: Fn(&str, J) -> T + Sync,
    {
        let Some(pool) = &self.pool else {
            let worker = self.endpoints.first().map(String::as_str).unwrap_or("localhost");
            return jobs.into_iter().map(|j| job(worker, j)).collect();
        };

        let count = jobs.len();
        debug!("Dispatching {count} jobs to {} workers", self.endpoints.len());

        let (tx, rx) = mpsc::channel();
        let endpoints = &self.endpoints;
        let job = &job;
        pool.scope(|s| {
            for (index, input) in jobs.into_iter().enumerate() {
                let tx = tx.clone();
                s.spawn(move |_| {
                    let worker = rayon::current_thread_index().unwrap_or(0) % endpoints.len();
                    let _ = tx.send((index, job(&endpoints[worker], input)));
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
        for (index, output) in rx {
            slots[index] = Some(output);
        }
        slots.into_iter().flatten().collect()
    }
}
