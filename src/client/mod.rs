// Remote Pipeline Client: the contract this controller needs from the
// execution service. No business logic lives here; request/response shapes
// and the transport are all it defines.

pub mod http;
pub mod wire;

use std::future::Future;

use crate::core::config::CorrectionConfig;
use crate::core::errors::Result;
use crate::core::types::StageKind;
use wire::{
    ApplyOutcome, BatchAccepted, BatchImageEntry, BatchProgress, ChartDetection, ModelSaved,
    RunOutcome, SaveOutcome, ServiceHealth,
};

pub use http::HttpPipelineClient;

/// Contract wrapper over the remote execution service.
///
/// All operations are single request/response; `poll_progress` is invoked
/// repeatedly by the batch coordinator (there is no push channel). The
/// executor and coordinators are generic over this trait so tests can swap
/// in a scripted in-process implementation.
pub trait PipelineClient: Send + Sync {
    /// Detect a color chart in the image at `image_index`.
    fn detect_chart(
        &self,
        image_index: usize,
    ) -> impl Future<Output = Result<ChartDetection>> + Send;

    /// Run the full correction pipeline on one image. `batch_mode` tells the
    /// service to skip Delta E and visualization work.
    fn run_pipeline(
        &self,
        image_index: usize,
        config: &CorrectionConfig,
        batch_mode: bool,
    ) -> impl Future<Output = Result<RunOutcome>> + Send;

    /// Whether a trained model currently exists on the service.
    fn check_model_available(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Apply the existing trained model to `image_indices` (inference only).
    fn apply_model(
        &self,
        image_indices: &[usize],
        workers: usize,
    ) -> impl Future<Output = Result<ApplyOutcome>> + Send;

    /// Submit a train-per-image batch job; completion is observed via
    /// `poll_progress`.
    fn run_pipeline_batch(
        &self,
        image_indices: &[usize],
        config: &CorrectionConfig,
        workers: usize,
    ) -> impl Future<Output = Result<BatchAccepted>> + Send;

    /// Snapshot of the in-flight batch job's progress.
    fn poll_progress(&self) -> impl Future<Output = Result<BatchProgress>> + Send;

    /// Save interactive results, keyed by result filename.
    fn save_images(
        &self,
        stages: &[StageKind],
        names: &[String],
        directory: Option<&str>,
    ) -> impl Future<Output = Result<SaveOutcome>> + Send;

    /// Save batch results, keyed by image index. `indices: None` saves all.
    fn save_batch_images(
        &self,
        stages: &[StageKind],
        indices: Option<&[usize]>,
        directory: Option<&str>,
    ) -> impl Future<Output = Result<SaveOutcome>> + Send;

    /// Persist the current trained model under `name`.
    fn save_model(
        &self,
        name: &str,
        folder: Option<&str>,
    ) -> impl Future<Output = Result<ModelSaved>> + Send;

    /// List batch results with their per-image available stages.
    fn batch_images_list(&self) -> impl Future<Output = Result<Vec<BatchImageEntry>>> + Send;

    /// Drop all server-side session state (images, results, model).
    fn clear_session(&self) -> impl Future<Output = Result<()>> + Send;

    /// Service liveness and capability probe.
    fn health(&self) -> impl Future<Output = Result<ServiceHealth>> + Send;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process client for tests. Responses are queued per
    //! operation and popped in order; running out of scripted responses is a
    //! test bug and panics loudly.

    use super::*;
    use crate::core::errors::WorkflowError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Route tracing output through the test harness. Respects `RUST_LOG`;
    /// only the first call installs a subscriber.
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[derive(Default)]
    pub struct ScriptedClient {
        detect: Mutex<VecDeque<Result<ChartDetection>>>,
        runs: Mutex<VecDeque<Result<RunOutcome>>>,
        applies: Mutex<VecDeque<Result<ApplyOutcome>>>,
        batches: Mutex<VecDeque<Result<BatchAccepted>>>,
        polls: Mutex<VecDeque<Result<BatchProgress>>>,
        poll_repeat: Mutex<Option<BatchProgress>>,
        saves: Mutex<VecDeque<Result<SaveOutcome>>>,
        model_saves: Mutex<VecDeque<Result<ModelSaved>>>,
        listings: Mutex<VecDeque<Result<Vec<BatchImageEntry>>>>,
        model_available: Mutex<bool>,
        apply_delay: Mutex<Option<Duration>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script_detect(&self, response: Result<ChartDetection>) {
            self.detect.lock().push_back(response);
        }

        pub fn script_run(&self, response: Result<RunOutcome>) {
            self.runs.lock().push_back(response);
        }

        pub fn script_apply(&self, response: Result<ApplyOutcome>) {
            self.applies.lock().push_back(response);
        }

        pub fn script_batch(&self, response: Result<BatchAccepted>) {
            self.batches.lock().push_back(response);
        }

        pub fn script_poll(&self, response: Result<BatchProgress>) {
            self.polls.lock().push_back(response);
        }

        /// After the scripted polls run out, keep returning this snapshot.
        pub fn repeat_poll(&self, snapshot: BatchProgress) {
            *self.poll_repeat.lock() = Some(snapshot);
        }

        pub fn script_save(&self, response: Result<SaveOutcome>) {
            self.saves.lock().push_back(response);
        }

        pub fn script_model_save(&self, response: Result<ModelSaved>) {
            self.model_saves.lock().push_back(response);
        }

        pub fn script_listing(&self, response: Result<Vec<BatchImageEntry>>) {
            self.listings.lock().push_back(response);
        }

        pub fn set_model_available(&self, available: bool) {
            *self.model_available.lock() = available;
        }

        /// Delay `apply_model` so interpolation ticks can run while the
        /// request is "in flight" (pair with `tokio::time::pause`).
        pub fn delay_apply(&self, delay: Duration) {
            *self.apply_delay.lock() = Some(delay);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self, op: &str) -> usize {
            self.calls.lock().iter().filter(|c| *c == op).count()
        }

        fn record(&self, op: &str) {
            self.calls.lock().push(op.to_string());
        }

        fn pop<T>(queue: &Mutex<VecDeque<Result<T>>>, op: &str) -> Result<T> {
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response left for {op}"))
        }

        // Convenience builders used across test modules.

        pub fn chart(detected: bool) -> ChartDetection {
            ChartDetection {
                detected,
                message: String::new(),
                confidence: if detected { 0.95 } else { 0.0 },
                patch_data: Vec::new(),
                visualization: None,
            }
        }

        pub fn run_outcome(stem: &str, stages: &[&str]) -> RunOutcome {
            RunOutcome {
                message: "ok".to_string(),
                images: stages
                    .iter()
                    .map(|stage| crate::core::types::ImageArtifact {
                        name: format!("{stem}_{stage}"),
                        data: format!("data:image/jpeg;base64,{stage}"),
                    })
                    .collect(),
                original_image: Some("data:image/jpeg;base64,orig".to_string()),
                diff_image: None,
                scatter_plot: None,
                delta_e_summary: Default::default(),
                model_saved: false,
            }
        }

        pub fn progress(
            active: bool,
            total: usize,
            completed: usize,
            failed: usize,
            per_image: Vec<(usize, &str)>,
        ) -> BatchProgress {
            BatchProgress {
                batch_id: "batch_test".to_string(),
                active,
                total,
                completed,
                failed,
                per_image: per_image
                    .into_iter()
                    .map(|(index, status)| wire::PerImageProgress {
                        image_index: index,
                        filename: format!("img{index}.png"),
                        status: status.to_string(),
                        error: (status == "failed").then(|| "boom".to_string()),
                    })
                    .collect(),
            }
        }
    }

    impl PipelineClient for ScriptedClient {
        async fn detect_chart(&self, _image_index: usize) -> Result<ChartDetection> {
            self.record("detect_chart");
            Self::pop(&self.detect, "detect_chart")
        }

        async fn run_pipeline(
            &self,
            _image_index: usize,
            _config: &CorrectionConfig,
            _batch_mode: bool,
        ) -> Result<RunOutcome> {
            self.record("run_pipeline");
            Self::pop(&self.runs, "run_pipeline")
        }

        async fn check_model_available(&self) -> Result<bool> {
            self.record("check_model_available");
            Ok(*self.model_available.lock())
        }

        async fn apply_model(
            &self,
            _image_indices: &[usize],
            _workers: usize,
        ) -> Result<ApplyOutcome> {
            self.record("apply_model");
            let delay = *self.apply_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Self::pop(&self.applies, "apply_model")
        }

        async fn run_pipeline_batch(
            &self,
            _image_indices: &[usize],
            _config: &CorrectionConfig,
            _workers: usize,
        ) -> Result<BatchAccepted> {
            self.record("run_pipeline_batch");
            Self::pop(&self.batches, "run_pipeline_batch")
        }

        async fn poll_progress(&self) -> Result<BatchProgress> {
            self.record("poll_progress");
            if let Some(response) = self.polls.lock().pop_front() {
                return response;
            }
            if let Some(snapshot) = self.poll_repeat.lock().clone() {
                return Ok(snapshot);
            }
            panic!("no scripted response left for poll_progress");
        }

        async fn save_images(
            &self,
            _stages: &[StageKind],
            _names: &[String],
            _directory: Option<&str>,
        ) -> Result<SaveOutcome> {
            self.record("save_images");
            Self::pop(&self.saves, "save_images")
        }

        async fn save_batch_images(
            &self,
            _stages: &[StageKind],
            _indices: Option<&[usize]>,
            _directory: Option<&str>,
        ) -> Result<SaveOutcome> {
            self.record("save_batch_images");
            Self::pop(&self.saves, "save_batch_images")
        }

        async fn save_model(&self, _name: &str, _folder: Option<&str>) -> Result<ModelSaved> {
            self.record("save_model");
            Self::pop(&self.model_saves, "save_model")
        }

        async fn batch_images_list(&self) -> Result<Vec<BatchImageEntry>> {
            self.record("batch_images_list");
            Self::pop(&self.listings, "batch_images_list")
        }

        async fn clear_session(&self) -> Result<()> {
            self.record("clear_session");
            Ok(())
        }

        async fn health(&self) -> Result<ServiceHealth> {
            self.record("health");
            Ok(ServiceHealth {
                status: "ok".to_string(),
                version: "test".to_string(),
                cc_available: true,
            })
        }
    }

    // Silence the unused-variant lint for error helpers some tests skip.
    #[allow(dead_code)]
    pub fn transport_error() -> WorkflowError {
        WorkflowError::Transport(crate::core::errors::TransportError::CircuitOpen)
    }

    #[allow(dead_code)]
    pub fn stage_error(stage: &str, detail: &str) -> WorkflowError {
        WorkflowError::RemoteStage {
            stage: stage.to_string(),
            detail: detail.to_string(),
        }
    }
}
