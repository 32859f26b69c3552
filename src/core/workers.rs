//! Thread pool for background jobs (linked content reloads).
//!
//! Uses work-stealing deques: jobs go into a global injector, idle workers
//! drain it and steal from each other.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Background worker pool.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4)?;
/// workers.execute(move || {
///     let _ = tx.send(loader.load(&path));
/// });
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers").field("threads", &self.handles.len()).finish()
    }
}

impl Workers {
    /// Spawn `num_threads` workers.
    ///
    /// Recommended: `num_cpus::get() * 3 / 4` (leave room for the owner thread).
    pub fn new(num_threads: usize) -> anyhow::Result<Self> {
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut pool = Self { injector, handles: Vec::with_capacity(num_threads), shutdown };
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&pool.injector);
            let shutdown = Arc::clone(&pool.shutdown);
            let stealers = stealers.clone();

            // On error `pool` drops here and stops the threads already spawned.
            let handle = thread::Builder::new()
                .name(format!("strata-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, local, &injector, &stealers, &shutdown))
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;
            pool.handles.push(handle);
        }

        trace!("Workers initialized: {} threads (work-stealing)", num_threads);
        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Run a closure on some worker thread. No return value; send results
    /// back over a channel.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }
}

fn worker_loop(
    worker_id: usize,
    local: Worker<Job>,
    injector: &Injector<Job>,
    stealers: &[Stealer<Job>],
    shutdown: &AtomicBool,
) {
    trace!("Worker {} started", worker_id);
    loop {
        if let Some(job) = local.pop() {
            job();
            continue;
        }
        if let Some(job) = injector.steal_batch_and_pop(&local).success() {
            job();
            continue;
        }
        if let Some(job) = stealers.iter().find_map(|s| s.steal().success()) {
            job();
            continue;
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        // Idle: short sleep instead of spinning.
        thread::sleep(Duration::from_millis(1));
    }
    trace!("Worker {} stopped", worker_id);
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // Loaders can block on slow disks; don't hang the owner past this.
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped gracefully", num_threads);
    }
}
