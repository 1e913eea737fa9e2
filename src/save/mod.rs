// Save Selector: decides what gets persisted by the remote service and
// through which save endpoint.
//
// Interactive results are keyed by result filename, batch results by image
// index. Batch saves are availability-filtered: an image that skipped a stage
// only contributes the stages it actually produced.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::client::wire::{BatchImageEntry, ModelSaved, SaveOutcome};
use crate::client::PipelineClient;
use crate::core::errors::{Result, WorkflowError};
use crate::core::types::StageKind;
use crate::registry::ImageRegistry;

/// What a save request will ask the service to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveManifest {
    pub stages: Vec<StageKind>,
    pub image_count: usize,
    pub file_count: usize,
}

/// Expected file count for an interactive save: every selected stage exists
/// for every selected result, so the product is exact.
pub fn interactive_manifest(stages: &[StageKind], image_count: usize) -> SaveManifest {
    SaveManifest {
        stages: stages.to_vec(),
        image_count,
        file_count: stages.len() * image_count,
    }
}

/// Expected file count for a batch save: per image, only the intersection of
/// the selected stages with what that image actually produced.
pub fn batch_manifest(stages: &[StageKind], entries: &[BatchImageEntry]) -> SaveManifest {
    let file_count = entries
        .iter()
        .map(|entry| {
            stages
                .iter()
                .filter(|stage| entry.available_steps.iter().any(|s| s == stage.as_str()))
                .count()
        })
        .sum();
    SaveManifest {
        stages: stages.to_vec(),
        image_count: entries.len(),
        file_count,
    }
}

/// Restrict a model name to alphanumerics, `_` and `-`. Anything else becomes
/// `_`; an effectively empty name falls back to a timestamped default.
pub fn sanitize_model_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '_') {
        default_model_name()
    } else {
        cleaned
    }
}

fn default_model_name() -> String {
    format!("cc_model_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

pub struct SaveSelector<C> {
    client: Arc<C>,
    registry: ImageRegistry,
}

impl<C: PipelineClient> SaveSelector<C> {
    pub fn new(client: Arc<C>, registry: ImageRegistry) -> Self {
        Self { client, registry }
    }

    /// Save interactive results for `indices`, keyed by result filename.
    /// Every index must have a stored result.
    #[instrument(skip(self))]
    pub async fn save_interactive(
        &self,
        stages: &[StageKind],
        indices: &[usize],
        directory: Option<&str>,
    ) -> Result<SaveOutcome> {
        if stages.is_empty() || indices.is_empty() {
            return Err(WorkflowError::Precondition(
                "nothing selected to save".to_string(),
            ));
        }

        let mut names = Vec::new();
        for &index in indices {
            let image = self.registry.get(index)?;
            let result = self.registry.result(index).ok_or_else(|| {
                WorkflowError::Precondition(format!("no results to save for {}", image.filename))
            })?;
            for stage in stages {
                if let Some(artifact) = result.stage_images.get(stage) {
                    names.push(artifact.name.clone());
                }
            }
        }

        let outcome = self.client.save_images(stages, &names, directory).await?;
        info!(saved = outcome.saved_count, directory = %outcome.directory, "interactive save finished");
        Ok(outcome)
    }

    /// Save batch results, index-keyed. `indices: None` saves everything the
    /// batch produced. Returns the manifest alongside the service outcome so
    /// callers can reconcile expected vs saved counts.
    #[instrument(skip(self))]
    pub async fn save_batch(
        &self,
        stages: &[StageKind],
        indices: Option<&[usize]>,
        directory: Option<&str>,
    ) -> Result<(SaveManifest, SaveOutcome)> {
        if stages.is_empty() {
            return Err(WorkflowError::Precondition(
                "no stages selected to save".to_string(),
            ));
        }

        let mut entries = self.client.batch_images_list().await?;
        if let Some(indices) = indices {
            entries.retain(|entry| indices.contains(&entry.image_index));
        }
        let manifest = batch_manifest(stages, &entries);
        if manifest.file_count == 0 {
            return Err(WorkflowError::Precondition(
                "selected stages produced no batch results".to_string(),
            ));
        }

        let outcome = self
            .client
            .save_batch_images(stages, indices, directory)
            .await?;
        if outcome.saved_count != manifest.file_count {
            warn!(
                expected = manifest.file_count,
                saved = outcome.saved_count,
                "batch save count mismatch"
            );
        }
        info!(saved = outcome.saved_count, "batch save finished");
        Ok((manifest, outcome))
    }

    /// Persist the current trained model on the service side.
    #[instrument(skip(self))]
    pub async fn save_model(&self, name: Option<&str>, folder: Option<&str>) -> Result<ModelSaved> {
        let model = self.registry.model().ok_or_else(|| {
            WorkflowError::Precondition("no trained model to save".to_string())
        })?;

        let name = match name {
            Some(name) => sanitize_model_name(name),
            None => default_model_name(),
        };
        let saved = self.client.save_model(&name, folder).await?;
        info!(
            name = %saved.name,
            path = %saved.path,
            source = %model.source_filename,
            "model saved"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedClient;
    use crate::core::types::ModelInfo;

    fn entry(index: usize, steps: &[&str]) -> BatchImageEntry {
        BatchImageEntry {
            image_index: index,
            filename: format!("img{index}.png"),
            available_steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn save_outcome(saved: usize) -> SaveOutcome {
        SaveOutcome {
            saved_count: saved,
            directory: "/out".to_string(),
            failed_files: Vec::new(),
        }
    }

    #[test]
    fn interactive_count_is_exact_product() {
        let manifest = interactive_manifest(&[StageKind::Gc, StageKind::Cc], 3);
        assert_eq!(manifest.file_count, 6);
    }

    #[test]
    fn batch_count_filters_by_availability() {
        let stages = [StageKind::Ffc, StageKind::Cc];
        let entries = vec![
            entry(0, &["FFC", "GC", "CC"]),
            entry(1, &["FFC"]),
            entry(2, &[]),
        ];
        // 2 + 1 + 0, never the naive 2 * 3.
        assert_eq!(batch_manifest(&stages, &entries).file_count, 3);
    }

    #[test]
    fn model_name_sanitization() {
        assert_eq!(sanitize_model_name("chart v2.1"), "chart_v2_1");
        assert_eq!(sanitize_model_name("ok_name-3"), "ok_name-3");
        // Nothing usable left: falls back to the timestamped default.
        assert!(sanitize_model_name(" ../!!").starts_with("cc_model_"));
    }

    #[tokio::test]
    async fn save_model_requires_trained_model() {
        let client = Arc::new(ScriptedClient::new());
        let registry = ImageRegistry::new();
        let selector = SaveSelector::new(Arc::clone(&client), registry.clone());

        let err = selector.save_model(None, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Precondition(_)));
        assert_eq!(client.call_count("save_model"), 0);

        registry.set_model(ModelInfo {
            source_index: 0,
            source_filename: "a.png".to_string(),
        });
        client.script_model_save(Ok(ModelSaved {
            path: "/models/m.pkl".to_string(),
            name: "m".to_string(),
        }));
        assert!(selector.save_model(Some("m"), None).await.is_ok());
    }

    #[tokio::test]
    async fn batch_save_uses_listing_for_manifest() {
        let client = Arc::new(ScriptedClient::new());
        let registry = ImageRegistry::new();
        registry.add(["a.png", "b.png"]);
        let selector = SaveSelector::new(Arc::clone(&client), registry);

        client.script_listing(Ok(vec![entry(0, &["CC"]), entry(1, &["FFC", "CC"])]));
        client.script_save(Ok(save_outcome(3)));

        let (manifest, outcome) = selector
            .save_batch(&[StageKind::Ffc, StageKind::Cc], None, None)
            .await
            .unwrap();
        assert_eq!(manifest.file_count, 3);
        assert_eq!(outcome.saved_count, 3);
    }

    #[tokio::test]
    async fn batch_save_with_no_available_results_rejected() {
        let client = Arc::new(ScriptedClient::new());
        let registry = ImageRegistry::new();
        registry.add(["a.png"]);
        let selector = SaveSelector::new(Arc::clone(&client), registry);

        client.script_listing(Ok(vec![entry(0, &["FFC"])]));
        let err = selector
            .save_batch(&[StageKind::Cc], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Precondition(_)));
        assert_eq!(client.call_count("save_batch_images"), 0);
    }

    #[tokio::test]
    async fn interactive_save_requires_stored_results() {
        let client = Arc::new(ScriptedClient::new());
        let registry = ImageRegistry::new();
        registry.add(["a.png"]);
        let selector = SaveSelector::new(Arc::clone(&client), registry.clone());

        let err = selector
            .save_interactive(&[StageKind::Cc], &[0], None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Precondition(_)));
    }
}
