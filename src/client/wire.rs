// Request/response shapes for the remote pipeline service.
//
// Field names mirror the service's JSON exactly (a mix of snake_case and
// camelCase on the request side), so every rename is explicit rather than
// relying on a container attribute.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::types::ImageArtifact;

// --- requests ---

#[derive(Debug, Serialize)]
pub struct DetectChartRequest {
    pub image_index: usize,
}

#[derive(Debug, Serialize)]
pub struct RunPipelineRequest {
    pub image_index: usize,
    pub method: String,
    #[serde(rename = "ffcEnabled")]
    pub ffc_enabled: bool,
    #[serde(rename = "gcEnabled")]
    pub gc_enabled: bool,
    #[serde(rename = "wbEnabled")]
    pub wb_enabled: bool,
    #[serde(rename = "ccEnabled")]
    pub cc_enabled: bool,
    #[serde(rename = "computeDeltaE")]
    pub compute_delta_e: bool,
    pub is_batch_mode: bool,
    #[serde(rename = "saveCcModel")]
    pub save_cc_model: bool,
    #[serde(rename = "ffcSettings")]
    pub ffc_settings: Value,
    #[serde(rename = "gcSettings")]
    pub gc_settings: Value,
    #[serde(rename = "ccSettings")]
    pub cc_settings: Value,
}

#[derive(Debug, Serialize)]
pub struct RunBatchRequest {
    pub image_indices: Vec<usize>,
    pub method: String,
    #[serde(rename = "ffcEnabled")]
    pub ffc_enabled: bool,
    #[serde(rename = "gcEnabled")]
    pub gc_enabled: bool,
    #[serde(rename = "wbEnabled")]
    pub wb_enabled: bool,
    #[serde(rename = "ccEnabled")]
    pub cc_enabled: bool,
    pub max_workers: usize,
    #[serde(rename = "ffcSettings")]
    pub ffc_settings: Value,
    #[serde(rename = "gcSettings")]
    pub gc_settings: Value,
    #[serde(rename = "ccSettings")]
    pub cc_settings: Value,
}

#[derive(Debug, Serialize)]
pub struct ApplyModelRequest {
    pub image_indices: Vec<usize>,
    pub max_workers: usize,
}

#[derive(Debug, Serialize)]
pub struct SaveImagesRequest {
    pub selected_steps: Vec<String>,
    pub selected_images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SaveBatchImagesRequest {
    pub selected_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_images: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SaveModelRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

// --- responses ---
//
// Every endpoint wraps its payload in a `{success, error?}` envelope; the
// HTTP client strips the envelope, so these are pure payload shapes.

#[derive(Debug, Clone, Deserialize)]
pub struct PatchSample {
    pub index: usize,
    pub name: String,
    pub rgb: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartDetection {
    pub detected: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub patch_data: Vec<PatchSample>,
    #[serde(default)]
    pub visualization: Option<String>,
}

/// Per-stage Delta E summary as the service reports it.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DeltaESummary {
    #[serde(rename = "DE_mean")]
    pub mean: f64,
    #[serde(rename = "DE_min")]
    pub min: f64,
    #[serde(rename = "DE_max")]
    pub max: f64,
    #[serde(rename = "DE_std", default)]
    pub std_dev: Option<f64>,
}

impl From<DeltaESummary> for crate::core::types::StageMetrics {
    fn from(summary: DeltaESummary) -> Self {
        Self {
            mean: summary.mean,
            min: summary.min,
            max: summary.max,
            std_dev: summary.std_dev,
        }
    }
}

/// Raw, heterogeneous output of a single pipeline run. The executor
/// normalizes this into a `PipelineResult`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub images: Vec<ImageArtifact>,
    #[serde(default)]
    pub original_image: Option<String>,
    #[serde(default)]
    pub diff_image: Option<String>,
    #[serde(default)]
    pub scatter_plot: Option<String>,
    /// Keyed by bare stage name ("FFC", "CC", ...).
    #[serde(default)]
    pub delta_e_summary: BTreeMap<String, DeltaESummary>,
    #[serde(default)]
    pub model_saved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchAccepted {
    pub batch_id: String,
    #[serde(rename = "total_images")]
    pub total: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerImageProgress {
    pub image_index: usize,
    #[serde(default)]
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchProgress {
    #[serde(default)]
    pub batch_id: String,
    pub active: bool,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    #[serde(rename = "progress", default)]
    pub per_image: Vec<PerImageProgress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerImageApply {
    pub image_index: usize,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyOutcome {
    pub processed_count: usize,
    pub failed_count: usize,
    pub total: usize,
    #[serde(default)]
    pub per_image: Vec<PerImageApply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveOutcome {
    pub saved_count: usize,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub failed_files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSaved {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cc_available: bool,
}

/// One entry of the batch-results listing used for save availability.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchImageEntry {
    pub image_index: usize,
    pub filename: String,
    #[serde(rename = "available_steps", default)]
    pub available_steps: Vec<String>,
}
