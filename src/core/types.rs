// Shared entities for the correction workflow

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A correction stage. Declaration order is the canonical pipeline order and
/// drives the `Ord` impl, so stage-keyed `BTreeMap`s iterate FFC, GC, WB, CC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Flat-field correction
    Ffc,
    /// Gamma correction
    Gc,
    /// White balance
    Wb,
    /// Color correction
    Cc,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [StageKind::Ffc, StageKind::Gc, StageKind::Wb, StageKind::Cc];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Ffc => "FFC",
            StageKind::Gc => "GC",
            StageKind::Wb => "WB",
            StageKind::Cc => "CC",
        }
    }

    /// Parse a stage from a remote result key. The service keys stage outputs
    /// either bare ("CC") or prefixed with the image name ("photo1_CC").
    pub fn from_result_key(key: &str) -> Option<StageKind> {
        let suffix = key.rsplit('_').next().unwrap_or(key);
        match suffix {
            "FFC" => Some(StageKind::Ffc),
            "GC" => Some(StageKind::Gc),
            "WB" => Some(StageKind::Wb),
            "CC" => Some(StageKind::Cc),
            _ => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a loaded image. Owned by the registry; everything else refers
/// to images by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub index: usize,
    pub filename: String,
}

impl ImageRef {
    /// Image name without extension, as the service uses it to key results.
    pub fn stem(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.filename)
    }
}

/// An encoded image produced by the remote service (data-URI payload).
/// Treated as an opaque artifact; this crate never decodes pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub name: String,
    pub data: String,
}

/// Delta E summary for one correction stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: Option<f64>,
}

/// Canonical, normalized outcome of one full pipeline run on one image.
///
/// Immutable once created: a re-run produces a fresh `PipelineResult` and the
/// previous one is discarded before the remote call is issued, never merged.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub image_index: usize,
    pub stage_images: BTreeMap<StageKind, ImageArtifact>,
    pub stage_metrics: BTreeMap<StageKind, StageMetrics>,
    pub scatter: Option<ImageArtifact>,
    pub diff: Option<ImageArtifact>,
    pub original: Option<ImageArtifact>,
}

impl PipelineResult {
    /// Stages that actually produced an output image, in pipeline order.
    pub fn available_stages(&self) -> Vec<StageKind> {
        self.stage_images.keys().copied().collect()
    }
}

/// Handle to the single current trained model. The model itself lives on the
/// remote service; this records only that one exists and which image trained it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub source_index: usize,
    pub source_filename: String,
}

/// Per-image outcome in a batch ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ImageStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
    /// No chart detected; a policy outcome, not a failure.
    Skipped,
}

impl ImageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImageStatus::Completed | ImageStatus::Failed(_) | ImageStatus::Skipped
        )
    }
}

/// Final counts reported for every batch. Invariant:
/// `succeeded + failed + skipped == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn accounted(&self) -> bool {
        self.succeeded + self.failed + self.skipped == self.total
    }
}
