// THEORY:
// The parallel pipeline executes the task graph of one equalization run on a
// bounded set of workers. There are two kinds of jobs: a tile job computes one
// histogram, a region job interpolates one output window. Only tile jobs are
// submitted up front; region jobs are released by the tile that completes a
// region's last dependency, so interpolation starts as soon as it can.
//
// A single dispatcher task hands jobs to the workers round-robin. Workers are
// blocking threads (the work is pure CPU) that pull from their own channel, so
// no more than `worker_count` jobs ever run at once, however many tiles the
// picture has. Finished regions travel back to the coordinator over a
// completion channel together with their pixels.
//
// Workers only hold a weak handle on the job queue, so the pool itself keeps
// the dispatcher alive. Dropping the pool without `shutdown` (for example when
// the coordinating future is cancelled) stops every worker at its next job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core_modules::interpolation_region::RegionGrid;
use crate::core_modules::lookup_table::LookupTable;
use crate::core_modules::pixel_buffer::{GrayPicture, View};
use crate::core_modules::tile::{MappingParameters, TileGrid};
use crate::error::{ClaheError, Result};

/// Everything the workers of one run read. Nothing in here changes while the
/// run is in flight, apart from the tiles' once-only histograms and the
/// regions' countdowns.
#[derive(Debug)]
pub struct EqualizationRun {
    /// The untouched source pixels.
    pub picture: GrayPicture,
    pub lut: LookupTable,
    pub params: MappingParameters,
    pub tiles: TileGrid,
    pub regions: RegionGrid,
}

/// A unit of work for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Tile(usize),
    Region(usize),
    Shutdown,
}

/// The equalized pixels of one region, row-major.
#[derive(Debug, Clone)]
pub struct RegionOutput {
    pub region: usize,
    pub view: View,
    pub pixels: Vec<u8>,
}

pub type Completion = Result<RegionOutput>;

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<Job>,
    abandoned: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one) over `run`. Every region
    /// result, or the first error a job hits, is sent to `completions`.
    pub fn new(
        worker_count: usize,
        run: Arc<EqualizationRun>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<Job>();
        let abandoned = Arc::new(AtomicBool::new(false));

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<Job>())
            .unzip();

        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(job) = task_receiver.recv().await {
                if job == Job::Shutdown {
                    for sender in &worker_senders {
                        let _ = sender.send(Job::Shutdown);
                    }
                    break;
                }
                let _ = worker_senders[worker_idx].send(job);
                worker_idx = (worker_idx + 1) % worker_senders.len();
            }
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(id, mut receiver)| {
                let run = Arc::clone(&run);
                let jobs = task_sender.downgrade();
                let abandoned = Arc::clone(&abandoned);
                let completions = completions.clone();

                tokio::task::spawn_blocking(move || {
                    let mut handled = 0usize;
                    while let Some(job) = receiver.blocking_recv() {
                        if abandoned.load(Ordering::Acquire) {
                            break;
                        }
                        match job {
                            Job::Tile(index) => Self::run_tile(&run, index, &jobs, &completions),
                            Job::Region(index) => {
                                let _ = completions.send(Self::run_region(&run, index));
                            }
                            Job::Shutdown => break,
                        }
                        handled += 1;
                    }
                    trace!(worker = id, jobs = handled, "worker stopped");
                })
            })
            .collect();

        debug!(workers = worker_count, "worker pool started");

        Self {
            task_sender,
            abandoned,
            dispatcher: Some(dispatcher),
            workers,
        }
    }

    fn run_tile(
        run: &EqualizationRun,
        index: usize,
        jobs: &mpsc::WeakUnboundedSender<Job>,
        completions: &mpsc::UnboundedSender<Completion>,
    ) {
        let Some(tile) = run.tiles.get(index) else {
            let _ = completions.send(Err(ClaheError::WorkerPool(format!(
                "no tile with index {index}"
            ))));
            return;
        };

        let result = tile.calculate_histogram(
            &run.picture,
            &run.lut,
            &run.params,
            &run.regions,
            |region| {
                if let Some(jobs) = jobs.upgrade() {
                    let _ = jobs.send(Job::Region(region));
                }
            },
        );

        if let Err(err) = result {
            let _ = completions.send(Err(err));
        }
    }

    fn run_region(run: &EqualizationRun, index: usize) -> Completion {
        let region = run.regions.get(index).ok_or_else(|| {
            ClaheError::WorkerPool(format!("no interpolation region with index {index}"))
        })?;
        let pixels = region.interpolate(&run.picture, &run.lut, &run.tiles)?;
        Ok(RegionOutput {
            region: index,
            view: region.view,
            pixels,
        })
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.task_sender
            .send(job)
            .map_err(|_| ClaheError::WorkerPool("Failed to send job to worker pool".to_string()))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops every worker after the jobs already handed to it and waits for
    /// all of them to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.task_sender.send(Job::Shutdown);

        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher
                .await
                .map_err(|e| ClaheError::WorkerPool(format!("dispatcher failed: {e}")))?;
        }
        for worker in std::mem::take(&mut self.workers) {
            worker
                .await
                .map_err(|e| ClaheError::WorkerPool(format!("worker failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.dispatcher.is_none() {
            return;
        }
        // Not shut down: drop whatever is still queued.
        self.abandoned.store(true, Ordering::Release);
        let _ = self.task_sender.send(Job::Shutdown);
        debug!("worker pool dropped without shutdown");
    }
}

/// Receives completions until `expected` regions have reported in, failing on
/// the first error or if the pool goes away early.
pub async fn collect_regions(
    receiver: &mut mpsc::UnboundedReceiver<Completion>,
    expected: usize,
) -> Result<Vec<RegionOutput>> {
    let mut outputs = Vec::with_capacity(expected);
    while outputs.len() < expected {
        match receiver.recv().await {
            Some(Ok(output)) => outputs.push(output),
            Some(Err(err)) => return Err(err),
            None => {
                return Err(ClaheError::WorkerPool(format!(
                    "pool stopped after {} of {} regions",
                    outputs.len(),
                    expected
                )));
            }
        }
    }
    Ok(outputs)
}
