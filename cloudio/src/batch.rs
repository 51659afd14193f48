//! Batch copy orchestration.
//!
//! A [`WorkerPool`] fans items out to a fixed set of threads over a
//! crossbeam channel. Each worker builds its own state once (for copies, its
//! own [`CloudInterface`] with its own adapters) and handles items until the
//! channel drains. Per-item failures are logged and collected; a batch never
//! aborts halfway.

use std::collections::HashSet;
use std::thread;
use std::time::Instant;

use tracing::{error, info};

use cloudio_common::path::join_path;
use cloudio_common::StorageResult;

use crate::interface::CloudInterface;

/// Number of workers used when none is given.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `task` to every item. `init` runs once per worker thread.
    /// Results come back in completion order.
    pub fn run<T, S, R, I, F>(&self, items: Vec<T>, init: I, task: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        I: Fn() -> S + Sync,
        F: Fn(&S, T) -> R + Sync,
    {
        let workers = self.workers.min(items.len());
        if workers <= 1 {
            let state = init();
            return items.into_iter().map(|item| task(&state, item)).collect();
        }

        let (item_tx, item_rx) = crossbeam_channel::unbounded::<T>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<R>();
        for item in items {
            // The receiver is alive until the scope below ends.
            let _ = item_tx.send(item);
        }
        drop(item_tx);

        let init = &init;
        let task = &task;
        thread::scope(|scope| {
            for _ in 0..workers {
                let item_rx = item_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    let state = init();
                    for item in item_rx.iter() {
                        if result_tx.send(task(&state, item)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        result_rx.try_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub workers: usize,
    /// Skip files already present under the destination.
    pub continue_copy: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            continue_copy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub from: String,
    pub to: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub copied: usize,
    /// Files left alone because the destination already had them.
    pub skipped: usize,
    pub failed: Vec<CopyFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn copy_one(interface: &CloudInterface, from: &str, to: &str) -> Result<(), CopyFailure> {
    interface.copy(from, to).map_err(|e| {
        error!(from = %from, to = %to, error = %e, "Copy failed");
        CopyFailure {
            from: from.to_string(),
            to: to.to_string(),
            error: e.to_string(),
        }
    })
}

/// Copy every `(from, to)` pair, continuing past failures.
pub(crate) fn copy_pairs(
    interface: &CloudInterface,
    pairs: Vec<(String, String)>,
    workers: usize,
) -> BatchReport {
    let total = pairs.len();
    let pool = WorkerPool::new(workers);

    let outcomes: Vec<Result<(), CopyFailure>> = if pool.workers() <= 1 || total <= 1 {
        pairs
            .iter()
            .map(|(from, to)| copy_one(interface, from, to))
            .collect()
    } else {
        pool.run(
            pairs,
            || interface.worker(),
            |worker: &StorageResult<CloudInterface>, (from, to)| match worker {
                Ok(worker) => copy_one(worker, &from, &to),
                Err(e) => {
                    error!(from = %from, to = %to, error = %e, "Worker could not start");
                    Err(CopyFailure {
                        from,
                        to,
                        error: e.to_string(),
                    })
                }
            },
        )
    };

    let mut report = BatchReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(()) => report.copied += 1,
            Err(failure) => report.failed.push(failure),
        }
    }
    report
}

/// Recursively copy the files below `source` to the same relative paths
/// below `dest`.
pub(crate) fn copy_dir(
    interface: &CloudInterface,
    source: &str,
    dest: &str,
    options: &BatchOptions,
) -> StorageResult<BatchReport> {
    let started = Instant::now();
    let mut files = interface.listdir(source, true, true)?;
    let total = files.len();

    if options.continue_copy {
        let existing: HashSet<String> = match interface.listdir(dest, true, true) {
            Ok(listing) => listing.into_iter().collect(),
            Err(e) if e.is_not_found() => HashSet::new(),
            Err(e) => return Err(e),
        };
        files.retain(|f| !existing.contains(f));
    }
    let skipped = total - files.len();

    let pairs = files
        .iter()
        .map(|relative| (join_path(source, relative), join_path(dest, relative)))
        .collect();
    let mut report = copy_pairs(interface, pairs, options.workers);
    report.skipped = skipped;

    info!(
        source = %source,
        dest = %dest,
        copied = report.copied,
        skipped = report.skipped,
        failed = report.failed.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Directory copy finished"
    );
    Ok(report)
}
