// Image Registry: the only shared mutable session state.
//
// Owns the ordered image set, the single running gate, the current trained
// model handle, and the per-image results. Everything else borrows images by
// index. The running gate is the sole mutual-exclusion primitive in the
// controller: overlapping operations are forbidden by design, so no
// finer-grained locking exists anywhere.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::errors::{Result, WorkflowError};
use crate::core::types::{ImageRef, ModelInfo, PipelineResult};

#[derive(Default)]
struct Inner {
    images: Vec<ImageRef>,
    selected: Option<usize>,
    running: bool,
    model: Option<ModelInfo>,
    results: HashMap<usize, PipelineResult>,
    chart_detected: HashMap<usize, bool>,
}

#[derive(Clone, Default)]
pub struct ImageRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register images in order; returned refs carry their registry indices.
    pub fn add<I, S>(&self, filenames: I) -> Vec<ImageRef>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        let mut added = Vec::new();
        for filename in filenames {
            let image = ImageRef {
                index: inner.images.len(),
                filename: filename.into(),
            };
            inner.images.push(image.clone());
            added.push(image);
        }
        info!(total = inner.images.len(), added = added.len(), "images registered");
        added
    }

    pub fn len(&self) -> usize {
        self.inner.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().images.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<ImageRef> {
        let inner = self.inner.lock();
        inner
            .images
            .get(index)
            .cloned()
            .ok_or(WorkflowError::InvalidIndex {
                index,
                total: inner.images.len(),
            })
    }

    pub fn images(&self) -> Vec<ImageRef> {
        self.inner.lock().images.clone()
    }

    pub fn select(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        if index >= inner.images.len() {
            return Err(WorkflowError::InvalidIndex {
                index,
                total: inner.images.len(),
            });
        }
        inner.selected = Some(index);
        Ok(())
    }

    pub fn selected(&self) -> Option<ImageRef> {
        let inner = self.inner.lock();
        inner.selected.and_then(|index| inner.images.get(index).cloned())
    }

    /// Invalidate all refs, results, detections, and the model slot.
    /// Rejected while an operation holds the run gate.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.running {
            return Err(WorkflowError::AlreadyRunning);
        }
        *inner = Inner::default();
        info!("registry cleared");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Acquire the run gate. Fails fast (never blocks) when an operation is
    /// already in flight; the returned guard releases the gate on every exit
    /// path, including panics and early error returns.
    pub fn begin_run(&self) -> Result<RunGuard> {
        let mut inner = self.inner.lock();
        if inner.running {
            return Err(WorkflowError::AlreadyRunning);
        }
        inner.running = true;
        debug!("run gate acquired");
        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Record that a new trained model exists, replacing any previous one.
    /// At most one current model exists at a time.
    pub fn set_model(&self, model: ModelInfo) {
        let mut inner = self.inner.lock();
        info!(source = %model.source_filename, "trained model recorded");
        inner.model = Some(model);
    }

    pub fn model(&self) -> Option<ModelInfo> {
        self.inner.lock().model.clone()
    }

    pub fn store_result(&self, result: PipelineResult) {
        self.inner.lock().results.insert(result.image_index, result);
    }

    pub fn result(&self, index: usize) -> Option<PipelineResult> {
        self.inner.lock().results.get(&index).cloned()
    }

    /// Discard the stored result for an image. Called before a re-run so a
    /// failed run can never leave a stale result visible.
    pub fn clear_result(&self, index: usize) -> Option<PipelineResult> {
        self.inner.lock().results.remove(&index)
    }

    pub fn record_detection(&self, index: usize, detected: bool) {
        self.inner.lock().chart_detected.insert(index, detected);
    }

    pub fn detection(&self, index: usize) -> Option<bool> {
        self.inner.lock().chart_detected.get(&index).copied()
    }
}

/// Scoped ownership of the running gate.
pub struct RunGuard {
    inner: Arc<Mutex<Inner>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.lock().running = false;
        debug!("run gate released");
    }
}
