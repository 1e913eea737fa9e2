// Batch Coordinator: drives one batch from a single control task.
//
// Three strategies share the same progress and ledger plumbing. Sequential
// training loops over images in order, parallel training submits once and
// polls, parallel apply fires one request and interpolates progress while it
// is in flight. Only one batch (or single run) can hold the registry's run
// gate at a time; there is no internal concurrency to coordinate.
//
// Abandoning the poll loop is the only disengagement: the remote job is never
// cancelled and may keep running.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::client::PipelineClient;
use crate::core::config::{Config, CorrectionConfig};
use crate::core::errors::{Result, TransportError, WorkflowError};
use crate::core::types::{BatchSummary, ImageStatus, ModelInfo};
use crate::executor::normalize;
use crate::orchestration::progress::{OutcomeLedger, ProgressTracker};
use crate::registry::ImageRegistry;
use crate::utils::Metrics;

/// How a batch is executed against the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// One image at a time, training a model per image.
    SequentialTrain,
    /// One submission, remote workers train per image, progress by polling.
    ParallelTrain,
    /// One inference request reusing the existing trained model.
    ParallelApply,
}

/// Pick a strategy for `image_count` images. A trained model always wins
/// (applying is strictly cheaper than retraining); otherwise the parallel
/// threshold decides between the training modes.
pub fn choose_strategy(
    image_count: usize,
    model_available: bool,
    parallel_threshold: usize,
) -> BatchStrategy {
    if model_available {
        BatchStrategy::ParallelApply
    } else if image_count >= parallel_threshold {
        BatchStrategy::ParallelTrain
    } else {
        BatchStrategy::SequentialTrain
    }
}

/// Displayed progress plus a coarse phase description.
#[derive(Debug, Clone)]
pub struct ProgressView {
    pub position: usize,
    pub total: usize,
    pub status_text: String,
}

/// Final outcome of one batch, sorted in stable image order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub strategy: BatchStrategy,
    pub workers: usize,
    pub summary: BatchSummary,
    pub outcomes: std::collections::BTreeMap<usize, ImageStatus>,
}

pub struct BatchCoordinator<C> {
    client: Arc<C>,
    registry: ImageRegistry,
    config: Config,
    metrics: Metrics,
    progress: Arc<Mutex<ProgressTracker>>,
}

impl<C> Clone for BatchCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            registry: self.registry.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            progress: Arc::clone(&self.progress),
        }
    }
}

impl<C: PipelineClient> BatchCoordinator<C> {
    pub fn new(client: Arc<C>, registry: ImageRegistry, config: Config, metrics: Metrics) -> Self {
        Self {
            client,
            registry,
            config,
            metrics,
            progress: Arc::new(Mutex::new(ProgressTracker::new(0))),
        }
    }

    /// Displayed progress of the batch in flight (or the last finished one,
    /// within the grace window).
    pub fn progress_position(&self) -> (usize, usize) {
        let progress = self.progress.lock();
        (progress.position(), progress.total())
    }

    /// Position, total, and the current phase description.
    pub fn progress_view(&self) -> ProgressView {
        let progress = self.progress.lock();
        ProgressView {
            position: progress.position(),
            total: progress.total(),
            status_text: progress.status_text().to_string(),
        }
    }

    fn set_status(&self, text: &str) {
        self.progress.lock().set_status(text);
    }

    /// Pick a strategy from the current model availability and run.
    pub async fn run_auto(
        &self,
        indices: &[usize],
        correction: &CorrectionConfig,
    ) -> Result<BatchReport> {
        let model_available = self.client.check_model_available().await?;
        let strategy = choose_strategy(
            indices.len(),
            model_available,
            self.config.batch.parallel_threshold,
        );
        self.run_batch(indices, correction, strategy).await
    }

    /// Run a batch over `indices` (empty slice means every registered image).
    #[instrument(skip(self, correction))]
    pub async fn run_batch(
        &self,
        indices: &[usize],
        correction: &CorrectionConfig,
        strategy: BatchStrategy,
    ) -> Result<BatchReport> {
        let indices = self.resolve_indices(indices)?;
        let _guard = self.registry.begin_run()?;

        let workers = self.config.effective_workers(indices.len());
        self.progress.lock().reset(indices.len());
        let mut ledger = OutcomeLedger::new(indices.iter().copied());
        self.metrics.record_batch_started();
        info!(images = indices.len(), workers, "batch started");

        let run = match strategy {
            BatchStrategy::SequentialTrain => {
                self.sequential_train(&indices, correction, &mut ledger).await
            }
            BatchStrategy::ParallelTrain => {
                self.parallel_train(&indices, correction, workers, &mut ledger)
                    .await
            }
            BatchStrategy::ParallelApply => {
                self.parallel_apply(&indices, workers, &mut ledger).await
            }
        };
        self.set_status(if run.is_ok() { "finished" } else { "failed" });
        self.metrics.record_batch_finished();
        run?;

        let summary = ledger.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "batch finished"
        );
        self.schedule_progress_reset();
        Ok(BatchReport {
            strategy,
            workers,
            summary,
            outcomes: ledger.statuses().clone(),
        })
    }

    fn resolve_indices(&self, indices: &[usize]) -> Result<Vec<usize>> {
        if self.registry.is_empty() {
            return Err(WorkflowError::NoImages);
        }
        if indices.is_empty() {
            return Ok(self.registry.images().iter().map(|i| i.index).collect());
        }
        for &index in indices {
            self.registry.get(index)?;
        }
        Ok(indices.to_vec())
    }

    /// Keep the final counts readable for the configured grace window, then
    /// reset the shared tracker for the next batch. The reset is tied to the
    /// tracker generation it was scheduled for: if another batch resets the
    /// tracker before the grace expires, the stale timer does nothing.
    fn schedule_progress_reset(&self) {
        let progress = Arc::clone(&self.progress);
        let grace = self.config.batch.ledger_grace;
        let generation = self.progress.lock().generation();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut progress = progress.lock();
            if progress.generation() == generation {
                progress.reset(0);
            }
        });
    }

    async fn sequential_train(
        &self,
        indices: &[usize],
        correction: &CorrectionConfig,
        ledger: &mut OutcomeLedger,
    ) -> Result<()> {
        self.set_status("training images sequentially");
        let mut done = 0usize;
        for &index in indices {
            let image = self.registry.get(index)?;
            let status = self.train_one(index, correction).await;
            match status {
                Ok(status) => {
                    if matches!(status, ImageStatus::Skipped) {
                        info!(image = %image.filename, "no chart detected, skipped");
                    }
                    ledger.record(index, status);
                }
                Err(err) if err.is_batch_fatal() => {
                    warn!(image = %image.filename, error = %err, "batch aborted");
                    return Err(err);
                }
                Err(err) => {
                    warn!(image = %image.filename, error = %err, "image failed");
                    ledger.record(index, ImageStatus::Failed(err.to_string()));
                }
            }
            done += 1;
            self.progress.lock().confirm(done);
        }
        Ok(())
    }

    /// Detect then train a single image within a sequential batch. Returns
    /// the ledger status; only batch-fatal errors propagate as `Err`.
    async fn train_one(
        &self,
        index: usize,
        correction: &CorrectionConfig,
    ) -> Result<ImageStatus> {
        let detection = self.client.detect_chart(index).await?;
        self.registry.record_detection(index, detection.detected);
        if !detection.detected {
            return Ok(ImageStatus::Skipped);
        }

        let image = self.registry.get(index)?;
        self.registry.clear_result(index);
        match self.client.run_pipeline(index, correction, true).await {
            Ok(outcome) => {
                if correction.save_model && correction.cc_enabled && outcome.model_saved {
                    self.registry.set_model(ModelInfo {
                        source_index: index,
                        source_filename: image.filename.clone(),
                    });
                }
                self.registry.store_result(normalize(&image, outcome));
                Ok(ImageStatus::Completed)
            }
            Err(err) if err.is_batch_fatal() => Err(err),
            Err(err) => Ok(ImageStatus::Failed(err.to_string())),
        }
    }

    async fn parallel_train(
        &self,
        indices: &[usize],
        correction: &CorrectionConfig,
        workers: usize,
        ledger: &mut OutcomeLedger,
    ) -> Result<()> {
        self.set_status("submitting batch");
        let accepted = self
            .client
            .run_pipeline_batch(indices, correction, workers)
            .await?;
        info!(batch_id = %accepted.batch_id, workers = accepted.workers, "batch accepted");
        self.set_status("polling batch progress");

        let started = Instant::now();
        let cap = self.config.batch.poll_safety_cap;
        loop {
            tokio::time::sleep(self.config.batch.poll_interval).await;
            if started.elapsed() > cap {
                return Err(WorkflowError::Transport(TransportError::PollTimeout(cap)));
            }

            let snapshot = self.client.poll_progress().await?;
            for index in ledger.absorb(&snapshot) {
                match ledger.status(index) {
                    Some(ImageStatus::Failed(detail)) => {
                        warn!(index, detail = %detail, "batch image failed")
                    }
                    _ => info!(index, "batch image completed"),
                }
            }
            self.progress
                .lock()
                .confirm(snapshot.completed + snapshot.failed);

            if !snapshot.active && snapshot.completed + snapshot.failed == snapshot.total {
                break;
            }
        }
        self.progress.lock().confirm(indices.len());

        // The exit condition is count-based; an image the final snapshot
        // still reported as in flight would otherwise stay non-terminal.
        let unresolved = ledger.finalize_unresolved("batch ended without a terminal status");
        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), "unresolved batch images marked failed");
        }
        Ok(())
    }

    async fn parallel_apply(
        &self,
        indices: &[usize],
        workers: usize,
        ledger: &mut OutcomeLedger,
    ) -> Result<()> {
        self.set_status("checking trained model");
        if !self.client.check_model_available().await? {
            return Err(WorkflowError::Precondition(
                "no trained model available to apply".to_string(),
            ));
        }
        self.set_status("applying trained model");

        // Single request; the service reports nothing until it responds, so
        // displayed progress is interpolated on a fixed cadence. The estimate
        // saturates below the total and never touches the ledger.
        let request = self.client.apply_model(indices, workers);
        tokio::pin!(request);
        let outcome = loop {
            tokio::select! {
                outcome = &mut request => break outcome?,
                _ = tokio::time::sleep(self.config.batch.poll_interval) => {
                    self.progress.lock().tick_estimate();
                }
            }
        };

        self.progress.lock().confirm(indices.len());
        if outcome.per_image.is_empty() {
            // Older service builds report only counts; attribute them in
            // submission order.
            for (position, &index) in indices.iter().enumerate() {
                let status = if position < outcome.processed_count {
                    ImageStatus::Completed
                } else {
                    ImageStatus::Failed("apply failed".to_string())
                };
                ledger.record(index, status);
            }
        } else {
            for entry in &outcome.per_image {
                let status = if entry.success {
                    ImageStatus::Completed
                } else {
                    ImageStatus::Failed(
                        entry
                            .error
                            .clone()
                            .unwrap_or_else(|| "apply failed".to_string()),
                    )
                };
                ledger.record(entry.image_index, status);
            }
        }
        info!(
            processed = outcome.processed_count,
            failed = outcome.failed_count,
            "apply finished"
        );
        Ok(())
    }
}
