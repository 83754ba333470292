//! Long-lived state shared by successive GEMM calls.
//!
//! A [`GemmContext`] owns the blocking configuration, one [`Scratch`] per
//! thread and (once a multi-threaded call needs it) a rayon pool with one
//! worker fewer than [`GemmConfig::thread_budget`]. The calling thread
//! always computes a slab itself, so the pool never needs as many workers
//! as threads.
//!
//! Dropping the context joins the workers.

use std::sync::{Arc, Condvar, Mutex};

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::blocked::single_thread::Scratch;
use crate::config::GemmConfig;
use crate::error::{GemmError, Result};

/// Reusable resources for GEMM calls. Not shareable between concurrent
/// calls; each call takes it by `&mut`.
#[derive(Debug)]
pub struct GemmContext {
    config: GemmConfig,
    pool: Option<WorkerPool>,
    scratch: Vec<Scratch>,
}

/// What one call borrows from the context.
pub(crate) struct Workspace<'a> {
    pub config: &'a GemmConfig,
    pub pool: Option<&'a ThreadPool>,
    pub scratch: &'a mut [Scratch],
}

impl Default for GemmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GemmContext {
    /// Context with [`GemmConfig::default`]: one thread per hardware thread.
    pub fn new() -> Self {
        Self {
            config: GemmConfig::default(),
            pool: None,
            scratch: Vec::new(),
        }
    }

    pub fn with_config(config: GemmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: None,
            scratch: Vec::new(),
        })
    }

    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    pub fn max_threads(&self) -> usize {
        self.config.max_threads
    }

    /// Changes the thread budget. An existing pool of the wrong size is
    /// shut down; the next multi-threaded call builds a new one.
    pub fn set_max_threads(&mut self, max_threads: usize) -> Result<()> {
        let config = self.config.clone().with_max_threads(max_threads);
        config.validate()?;
        if config.max_threads != self.config.max_threads {
            self.pool = None;
        }
        self.config = config;
        Ok(())
    }

    /// Whether worker threads are currently alive.
    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Borrows resources for a call running `threads` slabs, creating the
    /// pool and scratch buffers on first use. Slabs beyond the pool's size
    /// queue up; without workers they all run on the calling thread.
    pub(crate) fn workspace(&mut self, threads: usize) -> Result<Workspace<'_>> {
        let threads = threads.max(1);
        let workers = self.config.thread_budget() - 1;
        if threads > 1 && workers > 0 && self.pool.is_none() {
            self.pool = Some(WorkerPool::new(workers)?);
        }
        if self.scratch.len() < threads {
            self.scratch.resize_with(threads, Scratch::default);
        }
        Ok(Workspace {
            config: &self.config,
            pool: if threads > 1 {
                self.pool.as_ref().and_then(|p| p.pool.as_ref())
            } else {
                None
            },
            scratch: &mut self.scratch[..threads],
        })
    }
}

/// A rayon pool whose drop waits until every worker thread has exited.
struct WorkerPool {
    pool: Option<ThreadPool>,
    alive: Arc<(Mutex<usize>, Condvar)>,
}

impl WorkerPool {
    fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(GemmError::ThreadPool(
                "a worker pool needs at least one worker".to_string(),
            ));
        }
        let alive = Arc::new((Mutex::new(workers), Condvar::new()));
        let on_exit = Arc::clone(&alive);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("lowp-gemm-{}", i))
            .exit_handler(move |_| {
                let (count, exited) = &*on_exit;
                let mut count = count.lock().unwrap_or_else(|e| e.into_inner());
                *count -= 1;
                exited.notify_all();
            })
            .build()?;
        debug!("started {} GEMM worker threads", workers);
        Ok(Self {
            pool: Some(pool),
            alive,
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping the rayon pool only asks its workers to terminate.
        let workers = self.pool.take().map_or(0, |p| p.current_num_threads());
        let (count, exited) = &*self.alive;
        let mut count = count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = exited.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        debug!("joined {} GEMM worker threads", workers);
    }
}
