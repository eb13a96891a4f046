// THEORY:
// The `BatchPipeline` moves colocalization work off the caller's thread without
// ever running two images at once. A single blocking worker owns a
// `ColocPipeline` and drains a job queue in submission order; every job gets its
// own oneshot channel for the result, so callers can await jobs individually or
// consume the whole batch as an ordered stream.
//
// Cancellation is cooperative and coarse: the worker looks at the cancel flag
// only between jobs. A job that has started always runs to completion; every job
// still queued after the flag is raised resolves to `ColocError::Cancelled`.

use crate::core_modules::intensity_image::IntensityImage;
use crate::error::{ColocError, Result};
use crate::pipeline::{ChannelInput, ColocConfig, ColocPipeline, FrameReport, RawImage};
use futures::stream::{FuturesOrdered, Stream};
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// One image (or stack frame) to analyze.
#[derive(Debug, Clone)]
pub struct BatchJob<I = RawImage> {
    pub source: String,
    pub frame: usize,
    pub channels: Vec<ChannelInput<I>>,
}

struct JobTask<I> {
    job: BatchJob<I>,
    result_sender: oneshot::Sender<Result<FrameReport>>,
}

/// Stops the batch after the job currently running.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// Runs jobs one at a time on a background worker. Must be created inside a tokio runtime.
pub struct BatchPipeline<I = RawImage> {
    task_sender: mpsc::UnboundedSender<JobTask<I>>,
    worker: tokio::task::JoinHandle<()>,
    cancel: CancelHandle,
}

impl<I> BatchPipeline<I>
where
    I: IntensityImage + Send + 'static,
{
    pub fn spawn(config: ColocConfig) -> Result<Self> {
        let pipeline = ColocPipeline::new(config)?;
        let (task_sender, task_receiver) = mpsc::unbounded_channel::<JobTask<I>>();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker = tokio::task::spawn_blocking(move || {
            Self::run_worker(pipeline, task_receiver, cancel_rx);
        });

        Ok(Self {
            task_sender,
            worker,
            cancel: CancelHandle {
                cancel_tx: Arc::new(cancel_tx),
            },
        })
    }

    fn run_worker(
        pipeline: ColocPipeline,
        mut task_receiver: mpsc::UnboundedReceiver<JobTask<I>>,
        cancel_rx: watch::Receiver<bool>,
    ) {
        while let Some(task) = task_receiver.blocking_recv() {
            if *cancel_rx.borrow() {
                let _ = task.result_sender.send(Err(ColocError::Cancelled));
                continue;
            }

            let BatchJob {
                source,
                frame,
                channels,
            } = task.job;
            let result = pipeline.analyze(&source, frame, &channels);
            if let Err(e) = &result {
                warn!("{} [frame {}]: {}", source, frame, e);
            }
            // The caller may have stopped waiting; the result is simply dropped.
            let _ = task.result_sender.send(result);
        }
        debug!("batch worker stopped");
    }

    /// Queues a job and returns a future for its report.
    pub fn submit(&self, job: BatchJob<I>) -> impl Future<Output = Result<FrameReport>> + use<I> {
        let (result_sender, result_receiver) = oneshot::channel();
        let queued = self
            .task_sender
            .send(JobTask { job, result_sender })
            .is_ok();

        async move {
            if !queued {
                return Err(ColocError::WorkerUnavailable);
            }
            result_receiver
                .await
                .unwrap_or(Err(ColocError::WorkerUnavailable))
        }
    }

    /// Queues every job and yields their results in submission order.
    pub fn run_all(&self, jobs: Vec<BatchJob<I>>) -> impl Stream<Item = Result<FrameReport>> + use<I> {
        jobs.into_iter()
            .map(|job| self.submit(job))
            .collect::<FuturesOrdered<_>>()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Closes the queue and waits for the worker to finish what is already queued.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        if let Err(e) = self.worker.await {
            warn!("batch worker ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region::Region;
    use futures::StreamExt;
    use image::{GrayImage, Luma};

    fn job(source: &str, overlap: bool) -> BatchJob<GrayImage> {
        let image = GrayImage::from_pixel(64, 64, Luma([100]));
        let overlay_x = if overlap { 4 } else { 40 };
        BatchJob {
            source: source.to_string(),
            frame: 0,
            channels: vec![
                ChannelInput::new(vec![Region::rectangle(0, 0, 10, 10)], image.clone()),
                ChannelInput::new(vec![Region::rectangle(overlay_x, 4, 4, 4)], image),
            ],
        }
    }

    fn config() -> ColocConfig {
        ColocConfig {
            cell_diameter: 16,
            intensity_percentage: None,
            ..ColocConfig::default()
        }
    }

    #[tokio::test]
    async fn results_arrive_in_submission_order() {
        let batch = BatchPipeline::spawn(config()).expect("valid config");
        let jobs = vec![job("a.tif", true), job("b.tif", false), job("c.tif", true)];

        let reports: Vec<FrameReport> = batch
            .run_all(jobs)
            .map(|r| r.expect("job succeeds"))
            .collect()
            .await;

        let summary: Vec<(&str, usize)> = reports
            .iter()
            .map(|r| (r.source.as_str(), r.pairs.len()))
            .collect();
        assert_eq!(summary, vec![("a.tif", 1), ("b.tif", 0), ("c.tif", 1)]);
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn a_failing_job_does_not_stop_the_batch() {
        let batch = BatchPipeline::spawn(config()).expect("valid config");
        let mut broken = job("broken.tif", true);
        broken.channels.truncate(1);

        let first = batch.submit(broken).await;
        assert!(matches!(first, Err(ColocError::Config(_))));

        let second = batch.submit(job("fine.tif", true)).await.expect("job succeeds");
        assert_eq!(second.pairs.len(), 1);
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_batches_skip_remaining_jobs() {
        let batch = BatchPipeline::spawn(config()).expect("valid config");
        let cancel = batch.cancel_handle();

        let done = batch.submit(job("first.tif", true)).await;
        assert!(done.is_ok());

        cancel.cancel();
        assert!(cancel.is_cancelled());
        let skipped = batch.submit(job("second.tif", true)).await;
        assert!(matches!(skipped, Err(ColocError::Cancelled)));
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_configuration_is_reported_at_spawn() {
        let result = BatchPipeline::<GrayImage>::spawn(ColocConfig {
            cell_diameter: 0,
            ..ColocConfig::default()
        });
        assert!(matches!(result, Err(ColocError::Config(_))));
    }
}
