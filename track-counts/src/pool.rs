use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{error, info};

use crate::batch::{Batch, BatchId};
use crate::error::PipelineError;
use crate::summarize::BatchOutcome;

#[derive(Debug)]
pub struct BatchReport {
    pub id: BatchId,
    pub result: Result<BatchOutcome, PipelineError>,
}

/// Terminal state of every batch of a run, in stream order.
#[derive(Debug, Default)]
pub struct BatchPhaseReport {
    pub batches: Vec<BatchReport>,
}

impl BatchPhaseReport {
    pub fn attempted(&self) -> usize {
        self.batches.len()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&BatchId, &BatchOutcome)> {
        self.batches
            .iter()
            .filter_map(|b| b.result.as_ref().ok().map(|outcome| (&b.id, outcome)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&BatchId, &PipelineError)> {
        self.batches
            .iter()
            .filter_map(|b| b.result.as_ref().err().map(|e| (&b.id, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Runs batch jobs either on the calling thread or on a fixed set of workers.
pub struct WorkerPool {
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    /// `workers` of 0 or 1 runs every batch sequentially on the caller.
    pub fn new(workers: usize) -> Result<Self, PipelineError> {
        let pool = if workers <= 1 {
            None
        } else {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("batch-worker-{}", i))
                    .build()?,
            )
        };
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, |pool| pool.current_num_threads())
    }

    /// Runs `job` once per batch and waits for all of them.
    ///
    /// Batches are submitted in stream order as they are pulled from
    /// `batches`. A failing or panicking job only fails its own batch.
    pub fn run<T, I, F>(&self, batches: I, job: F) -> BatchPhaseReport
    where
        T: Send,
        I: IntoIterator<Item = Batch<T>>,
        F: Fn(&Batch<T>) -> Result<BatchOutcome, PipelineError> + Sync,
    {
        let mut reports = match &self.pool {
            None => batches
                .into_iter()
                .map(|batch| run_one(&job, batch))
                .collect::<Vec<_>>(),
            Some(pool) => {
                let (tx, rx) = mpsc::channel();
                let job = &job;
                pool.in_place_scope(|scope| {
                    for batch in batches {
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            // the receiver outlives the scope
                            let _ = tx.send(run_one(job, batch));
                        });
                    }
                });
                drop(tx);
                rx.into_iter().collect()
            }
        };
        reports.sort_by_key(|report| report.id.ordinal);
        BatchPhaseReport { batches: reports }
    }
}

fn run_one<T, F>(job: &F, batch: Batch<T>) -> BatchReport
where
    F: Fn(&Batch<T>) -> Result<BatchOutcome, PipelineError>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| job(&batch)))
        .unwrap_or_else(|payload| Err(PipelineError::WorkerPanicked(panic_message(payload))));
    match &result {
        Ok(outcome) => info!(
            "{} done: computed {:?}, skipped {:?}",
            batch.id, outcome.computed, outcome.skipped
        ),
        Err(e) => error!("{} failed: {}", batch.id, e),
    }
    BatchReport {
        id: batch.id,
        result,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerPool;
    use crate::batch::{Batch, Batcher};
    use crate::error::PipelineError;
    use crate::summarize::BatchOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(batch: &Batch<u32>) -> Result<BatchOutcome, PipelineError> {
        if batch.id.ordinal == 1 {
            return Err(PipelineError::WorkerPanicked("refused".to_string()));
        }
        if batch.id.ordinal == 2 {
            panic!("batch two blew up");
        }
        Ok(BatchOutcome {
            decoded: batch.items.len(),
            ..Default::default()
        })
    }

    #[test]
    fn sequential_and_parallel_agree() {
        for workers in [0, 1, 4] {
            let pool = WorkerPool::new(workers).unwrap();
            let report = pool.run(Batcher::new(0..10u32, 2).unwrap(), job);

            assert_eq!(report.attempted(), 5, "workers={}", workers);
            let ordinals: Vec<_> = report.batches.iter().map(|b| b.id.ordinal).collect();
            assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);

            let failed: Vec<_> = report.failed().map(|(id, _)| id.ordinal).collect();
            assert_eq!(failed, vec![1, 2]);
            assert!(matches!(
                report.failed().nth(1),
                Some((_, PipelineError::WorkerPanicked(msg))) if msg == "batch two blew up"
            ));
            assert_eq!(report.succeeded().count(), 3);
            assert!(!report.is_complete());
        }
    }

    #[test]
    fn every_batch_runs_exactly_once() {
        let seen = AtomicUsize::new(0);
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.workers(), 3);
        let report = pool.run(Batcher::new(0..1000u32, 7).unwrap(), |batch| {
            seen.fetch_add(batch.items.len(), Ordering::SeqCst);
            Ok(BatchOutcome::default())
        });
        assert!(report.is_complete());
        assert_eq!(report.attempted(), 143);
        assert_eq!(seen.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn empty_input_runs_nothing() {
        let pool = WorkerPool::new(2).unwrap();
        let report = pool.run(Batcher::new(0..0u32, 7).unwrap(), job);
        assert_eq!(report.attempted(), 0);
        assert!(report.is_complete());
    }
}
