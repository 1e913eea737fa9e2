// HTTP implementation of the Remote Pipeline Client.
//
// Transport concerns only: endpoint mapping, envelope handling, timeouts,
// circuit breaking, and call metrics. The orchestration layers never see a
// URL or a status code.

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::core::config::{Config, CorrectionConfig};
use crate::core::errors::{Result, TransportError, WorkflowError};
use crate::core::types::StageKind;
use crate::middleware::circuit_breaker::CircuitBreaker;
use crate::utils::Metrics;

use super::wire::{
    ApplyModelRequest, ApplyOutcome, BatchAccepted, BatchImageEntry, BatchProgress,
    ChartDetection, DetectChartRequest, ModelSaved, RunBatchRequest, RunOutcome,
    RunPipelineRequest, SaveBatchImagesRequest, SaveImagesRequest, SaveModelRequest, SaveOutcome,
    ServiceHealth,
};
use super::PipelineClient;

pub struct HttpPipelineClient {
    base_url: String,
    http: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl HttpPipelineClient {
    pub fn new(config: &Config, metrics: Option<Metrics>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.service.connect_timeout)
            .timeout(config.service.request_timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            base_url: config.service.base_url.trim_end_matches('/').to_string(),
            http,
            circuit_breaker: CircuitBreaker::default(),
            metrics,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and strip the `{success, error}` envelope.
    async fn post(&self, op: &'static str, path: &str, body: &impl Serialize) -> Result<Value> {
        if !self.circuit_breaker.allow() {
            warn!(op, "circuit open; failing fast");
            return Err(TransportError::CircuitOpen.into());
        }

        let start = Instant::now();
        let response = self.http.post(self.url(path)).json(body).send().await;
        self.finish(op, start, response).await
    }

    async fn get(&self, op: &'static str, path: &str) -> Result<Value> {
        if !self.circuit_breaker.allow() {
            warn!(op, "circuit open; failing fast");
            return Err(TransportError::CircuitOpen.into());
        }

        let start = Instant::now();
        let response = self.http.get(self.url(path)).send().await;
        self.finish(op, start, response).await
    }

    async fn finish(
        &self,
        op: &'static str,
        start: Instant,
        response: reqwest::Result<reqwest::Response>,
    ) -> Result<Value> {
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.circuit_breaker.record_failure();
                self.record(op, false, start);
                return Err(TransportError::Http(err).into());
            }
        };

        let status = response.status();
        let value: Value = match response.json().await {
            Ok(value) => value,
            Err(err) => {
                self.circuit_breaker.record_failure();
                self.record(op, false, start);
                return Err(TransportError::BadResponse(err.to_string()).into());
            }
        };

        // The service answered; transport is healthy even if it reports a
        // pipeline-level failure.
        self.circuit_breaker.record_success();

        let success = value.get("success").and_then(Value::as_bool).unwrap_or(
            // /api/health has no envelope
            status == StatusCode::OK,
        );
        if !success {
            self.record(op, false, start);
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unspecified service error")
                .to_string();
            // A batch-in-progress conflict or an outright HTTP error is a
            // transport-level rejection; anything else names a stage.
            if !status.is_success() {
                return Err(TransportError::Rejected {
                    status: status.as_u16(),
                    message,
                }
                .into());
            }
            return Err(remote_failure(op, message));
        }

        self.record(op, true, start);
        debug!(op, elapsed_ms = start.elapsed().as_millis() as u64, "remote call ok");
        Ok(value)
    }

    fn record(&self, op: &'static str, success: bool, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_remote_call(op, success, start.elapsed());
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|err| TransportError::BadResponse(err.to_string()).into())
    }

    fn stage_names(stages: &[StageKind]) -> Vec<String> {
        stages.iter().map(|stage| stage.as_str().to_string()).collect()
    }
}

/// Map a service-reported failure to a stage-attributed error. The service
/// reports errors as free text; when the message names a stage, carry it.
fn remote_failure(op: &str, message: String) -> WorkflowError {
    let stage = message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| match token {
            "FFC" => Some("FFC"),
            "GC" => Some("GC"),
            "WB" => Some("WB"),
            "CC" => Some("CC"),
            _ => None,
        })
        .unwrap_or(op);
    WorkflowError::RemoteStage {
        stage: stage.to_string(),
        detail: message,
    }
}

impl PipelineClient for HttpPipelineClient {
    #[instrument(skip(self))]
    async fn detect_chart(&self, image_index: usize) -> Result<ChartDetection> {
        let value = self
            .post(
                "detect_chart",
                "/api/detect-chart",
                &DetectChartRequest { image_index },
            )
            .await?;
        let detection = value
            .get("detection")
            .cloned()
            .ok_or_else(|| TransportError::BadResponse("missing detection".to_string()))?;
        Self::parse(detection)
    }

    #[instrument(skip(self, config))]
    async fn run_pipeline(
        &self,
        image_index: usize,
        config: &CorrectionConfig,
        batch_mode: bool,
    ) -> Result<RunOutcome> {
        let compute_delta_e = config.compute_delta_e && !batch_mode;
        let request = RunPipelineRequest {
            image_index,
            method: config.method.as_str().to_string(),
            ffc_enabled: config.ffc_enabled,
            gc_enabled: config.gc_enabled,
            wb_enabled: config.wb_enabled,
            cc_enabled: config.cc_enabled,
            compute_delta_e,
            is_batch_mode: batch_mode,
            save_cc_model: config.save_model,
            ffc_settings: settings_value(&config.ffc, compute_delta_e),
            gc_settings: settings_value(&config.gc, compute_delta_e),
            cc_settings: settings_value(&config.cc, compute_delta_e),
        };
        let value = self.post("run_pipeline", "/api/run-cc", &request).await?;
        Self::parse(value)
    }

    #[instrument(skip(self))]
    async fn check_model_available(&self) -> Result<bool> {
        let value = self.get("check_model", "/api/check-model").await?;
        Ok(value
            .get("model_available")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    #[instrument(skip(self), fields(images = image_indices.len()))]
    async fn apply_model(&self, image_indices: &[usize], workers: usize) -> Result<ApplyOutcome> {
        let request = ApplyModelRequest {
            image_indices: image_indices.to_vec(),
            max_workers: workers,
        };
        let value = self.post("apply_model", "/api/apply-cc", &request).await?;
        Self::parse(value)
    }

    #[instrument(skip(self, config), fields(images = image_indices.len(), workers))]
    async fn run_pipeline_batch(
        &self,
        image_indices: &[usize],
        config: &CorrectionConfig,
        workers: usize,
    ) -> Result<BatchAccepted> {
        let request = RunBatchRequest {
            image_indices: image_indices.to_vec(),
            method: config.method.as_str().to_string(),
            ffc_enabled: config.ffc_enabled,
            gc_enabled: config.gc_enabled,
            wb_enabled: config.wb_enabled,
            cc_enabled: config.cc_enabled,
            max_workers: workers,
            // Batch runs never compute Delta E server-side.
            ffc_settings: settings_value(&config.ffc, false),
            gc_settings: settings_value(&config.gc, false),
            cc_settings: settings_value(&config.cc, false),
        };
        let value = self
            .post("run_pipeline_batch", "/api/run-cc-parallel", &request)
            .await?;
        Self::parse(value)
    }

    async fn poll_progress(&self) -> Result<BatchProgress> {
        if let Some(metrics) = &self.metrics {
            metrics.record_poll_tick();
        }
        let value = self.get("poll_progress", "/api/batch-progress").await?;
        Self::parse(value)
    }

    #[instrument(skip(self), fields(stages = stages.len(), names = names.len()))]
    async fn save_images(
        &self,
        stages: &[StageKind],
        names: &[String],
        directory: Option<&str>,
    ) -> Result<SaveOutcome> {
        let request = SaveImagesRequest {
            selected_steps: Self::stage_names(stages),
            selected_images: names.to_vec(),
            directory: directory.map(str::to_string),
        };
        let value = self.post("save_images", "/api/save-images", &request).await?;
        Self::parse(value)
    }

    #[instrument(skip(self), fields(stages = stages.len()))]
    async fn save_batch_images(
        &self,
        stages: &[StageKind],
        indices: Option<&[usize]>,
        directory: Option<&str>,
    ) -> Result<SaveOutcome> {
        let request = SaveBatchImagesRequest {
            selected_steps: Self::stage_names(stages),
            selected_images: indices.map(|indices| indices.to_vec()),
            directory: directory.map(str::to_string),
        };
        let value = self
            .post("save_batch_images", "/api/save-batch-images", &request)
            .await?;
        Self::parse(value)
    }

    #[instrument(skip(self))]
    async fn save_model(&self, name: &str, folder: Option<&str>) -> Result<ModelSaved> {
        let request = SaveModelRequest {
            name: name.to_string(),
            folder: folder.map(str::to_string),
        };
        let value = self.post("save_model", "/api/save-model", &request).await?;
        Self::parse(value)
    }

    async fn batch_images_list(&self) -> Result<Vec<BatchImageEntry>> {
        let value = self.get("batch_images_list", "/api/batch-images-list").await?;
        let images = value
            .get("images")
            .cloned()
            .ok_or_else(|| TransportError::BadResponse("missing images".to_string()))?;
        Self::parse(images)
    }

    async fn clear_session(&self) -> Result<()> {
        self.post("clear_session", "/api/clear-session", &Value::Null)
            .await?;
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        let value = self.get("health", "/api/health").await?;
        Self::parse(value)
    }
}

/// Serialize a settings bundle and inject the flags the service reads from
/// every bundle (`get_deltaE`, `show`).
fn settings_value(settings: &impl Serialize, get_delta_e: bool) -> Value {
    let mut value = serde_json::to_value(settings).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Value::Object(map) = &mut value {
        map.insert("get_deltaE".to_string(), Value::Bool(get_delta_e));
        map.insert("show".to_string(), Value::Bool(false));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FfcSettings;

    #[test]
    fn settings_value_injects_flags() {
        let value = settings_value(&FfcSettings::default(), true);
        assert_eq!(value["get_deltaE"], true);
        assert_eq!(value["show"], false);
        assert_eq!(value["bins"], 50);
    }

    #[test]
    fn remote_failure_picks_stage_from_message() {
        let err = remote_failure("run_pipeline", "GC fit diverged".to_string());
        match err {
            WorkflowError::RemoteStage { stage, .. } => assert_eq!(stage, "GC"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn remote_failure_defaults_to_operation() {
        let err = remote_failure("detect_chart", "no images uploaded".to_string());
        match err {
            WorkflowError::RemoteStage { stage, .. } => assert_eq!(stage, "detect_chart"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
