// Single-Run Executor: chart detection and one-image pipeline runs.
//
// Owns the normalization from the service's heterogeneous run output into the
// canonical `PipelineResult`, and the selection policy for runs requested
// without an explicit target.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::client::wire::{ChartDetection, RunOutcome};
use crate::client::PipelineClient;
use crate::core::config::{Config, CorrectionConfig, SelectionPolicy};
use crate::core::errors::{Result, WorkflowError};
use crate::core::types::{ImageArtifact, ImageRef, ModelInfo, PipelineResult, StageKind};
use crate::registry::ImageRegistry;

pub struct SingleRunExecutor<C> {
    client: Arc<C>,
    registry: ImageRegistry,
    config: Config,
}

impl<C: PipelineClient> SingleRunExecutor<C> {
    pub fn new(client: Arc<C>, registry: ImageRegistry, config: Config) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    /// Detect a color chart in the image at `index` and record the outcome.
    /// Holds the run gate for the duration: remote session state is shared,
    /// so detection must not overlap an in-flight run.
    #[instrument(skip(self))]
    pub async fn detect_chart(&self, index: usize) -> Result<ChartDetection> {
        let image = self.registry.get(index)?;
        let _guard = self.registry.begin_run()?;
        let detection = self.client.detect_chart(index).await?;
        info!(
            image = %image.filename,
            detected = detection.detected,
            confidence = detection.confidence,
            "chart detection finished"
        );
        self.registry.record_detection(index, detection.detected);
        Ok(detection)
    }

    /// Run the full pipeline on one image and store the normalized result.
    ///
    /// `index: None` resolves the target through the current selection and,
    /// failing that, the configured selection policy. The prior result for
    /// the target is discarded before the remote call so a failed run never
    /// leaves a stale result behind.
    #[instrument(skip(self, correction))]
    pub async fn run_one(
        &self,
        index: Option<usize>,
        correction: &CorrectionConfig,
    ) -> Result<PipelineResult> {
        let target = self.resolve_target(index)?;
        let _guard = self.registry.begin_run()?;

        self.registry.clear_result(target.index);
        let outcome = self
            .client
            .run_pipeline(target.index, correction, false)
            .await?;

        if correction.save_model && correction.cc_enabled && outcome.model_saved {
            self.registry.set_model(ModelInfo {
                source_index: target.index,
                source_filename: target.filename.clone(),
            });
        }

        let result = normalize(&target, outcome);
        info!(
            image = %target.filename,
            stages = result.stage_images.len(),
            metrics = result.stage_metrics.len(),
            "pipeline run finished"
        );
        self.registry.store_result(result.clone());
        Ok(result)
    }

    fn resolve_target(&self, index: Option<usize>) -> Result<ImageRef> {
        if self.registry.is_empty() {
            return Err(WorkflowError::NoImages);
        }
        if let Some(index) = index {
            return self.registry.get(index);
        }
        if let Some(selected) = self.registry.selected() {
            return Ok(selected);
        }
        match self.config.selection_policy {
            SelectionPolicy::FallbackToFirst => {
                let first = self.registry.get(0)?;
                warn!(image = %first.filename, "no image selected, falling back to first");
                Ok(first)
            }
            SelectionPolicy::RequireExplicit => Err(WorkflowError::Precondition(
                "no image selected and explicit selection is required".to_string(),
            )),
        }
    }
}

/// Fold the service's run output into the canonical per-image result.
///
/// Stage outputs arrive as a flat artifact list keyed by name suffix and a
/// Delta E map keyed the same way; both land in stage-ordered maps here.
/// Unrecognized keys are dropped, not errors.
pub(crate) fn normalize(image: &ImageRef, outcome: RunOutcome) -> PipelineResult {
    let mut stage_images = std::collections::BTreeMap::new();
    for artifact in outcome.images {
        if let Some(stage) = StageKind::from_result_key(&artifact.name) {
            stage_images.insert(stage, artifact);
        }
    }

    let mut stage_metrics = std::collections::BTreeMap::new();
    for (key, summary) in outcome.delta_e_summary {
        if let Some(stage) = StageKind::from_result_key(&key) {
            stage_metrics.insert(stage, summary.into());
        }
    }

    let wrap = |suffix: &str, data: Option<String>| {
        data.map(|data| ImageArtifact {
            name: format!("{}_{suffix}", image.stem()),
            data,
        })
    };

    PipelineResult {
        image_index: image.index,
        stage_images,
        stage_metrics,
        scatter: wrap("scatter", outcome.scatter_plot),
        diff: wrap("diff", outcome.diff_image),
        original: wrap("original", outcome.original_image),
    }
}
