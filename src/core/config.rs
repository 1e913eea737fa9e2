use crate::core::errors::ConfigError;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::Level;

/// Hard bounds on the remote worker count for batch requests.
pub const WORKER_MIN: usize = 1;
pub const WORKER_MAX: usize = 8;

/// Fitting method forwarded to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitMethod {
    #[default]
    Pls,
    Nn,
    Linear,
    Svm,
    Conventional,
}

impl FitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitMethod::Pls => "pls",
            FitMethod::Nn => "nn",
            FitMethod::Linear => "linear",
            FitMethod::Svm => "svm",
            FitMethod::Conventional => "conventional",
        }
    }
}

/// What to do when a single run is requested with no image selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Fall back to the first registered image, logged at warn level.
    #[default]
    FallbackToFirst,
    /// Reject the run with a precondition error.
    RequireExplicit,
}

/// Flat-field correction parameters (service defaults mirrored here).
#[derive(Debug, Clone, Serialize)]
pub struct FfcSettings {
    pub manual_crop: bool,
    pub bins: u32,
    pub smooth_window: u32,
    pub degree: u32,
    pub fit_method: String,
    pub interactions: bool,
    pub max_iter: u32,
    pub tol: f64,
}

impl Default for FfcSettings {
    fn default() -> Self {
        Self {
            manual_crop: false,
            bins: 50,
            smooth_window: 5,
            degree: 3,
            fit_method: "pls".to_string(),
            interactions: true,
            max_iter: 1000,
            tol: 1e-8,
        }
    }
}

/// Gamma correction parameters.
#[derive(Debug, Clone, Serialize)]
pub struct GcSettings {
    pub max_degree: u32,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self { max_degree: 5 }
    }
}

/// White balance has no tunable parameters beyond the flags the client
/// injects at request time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WbSettings {}

/// Color correction parameters.
#[derive(Debug, Clone, Serialize)]
pub struct CcSettings {
    pub cc_method: String,
    pub method: String,
    pub degree: u32,
    pub max_iterations: u32,
    pub random_state: u32,
    pub tol: f64,
    pub param_search: bool,
    pub n_samples: u32,
    pub ncomp: u32,
    pub nlayers: u32,
    pub hidden_layers: Vec<u32>,
    pub learning_rate: f64,
    pub batch_size: u32,
    pub patience: u32,
    pub dropout_rate: f64,
    pub optim_type: String,
    pub use_batch_norm: bool,
}

impl Default for CcSettings {
    fn default() -> Self {
        Self {
            cc_method: "ours".to_string(),
            method: "Finlayson 2015".to_string(),
            degree: 2,
            max_iterations: 10_000,
            random_state: 0,
            tol: 1e-8,
            param_search: false,
            n_samples: 50,
            ncomp: 1,
            nlayers: 100,
            hidden_layers: vec![64, 32, 16],
            learning_rate: 0.001,
            batch_size: 16,
            patience: 10,
            dropout_rate: 0.2,
            optim_type: "adam".to_string(),
            use_batch_norm: true,
        }
    }
}

/// Immutable snapshot of the correction setup for one run.
///
/// Cloned when a run starts; later edits by the caller must not affect an
/// in-flight run, so nothing here is behind shared mutability.
#[derive(Debug, Clone, Default)]
pub struct CorrectionConfig {
    pub ffc_enabled: bool,
    pub gc_enabled: bool,
    pub wb_enabled: bool,
    pub cc_enabled: bool,
    pub method: FitMethod,
    pub ffc: FfcSettings,
    pub gc: GcSettings,
    pub wb: WbSettings,
    pub cc: CcSettings,
    /// Compute Delta E metrics (forced off by the service in batch mode).
    pub compute_delta_e: bool,
    /// Ask the service to keep the trained model for apply-to-others.
    pub save_model: bool,
}

impl CorrectionConfig {
    /// All four stages enabled with defaults and Delta E on.
    pub fn all_stages() -> Self {
        Self {
            ffc_enabled: true,
            gc_enabled: true,
            wb_enabled: true,
            cc_enabled: true,
            compute_delta_e: true,
            ..Self::default()
        }
    }

    pub fn enabled_stages(&self) -> Vec<crate::core::types::StageKind> {
        use crate::core::types::StageKind;
        let mut stages = Vec::new();
        if self.ffc_enabled {
            stages.push(StageKind::Ffc);
        }
        if self.gc_enabled {
            stages.push(StageKind::Gc);
        }
        if self.wb_enabled {
            stages.push(StageKind::Wb);
        }
        if self.cc_enabled {
            stages.push(StageKind::Cc);
        }
        stages
    }
}

/// Remote service connection configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Batch coordination configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Fixed cadence of the progress poll loop.
    pub poll_interval: Duration,
    /// Safety net for the poll loop; large batches are slow by design, so
    /// this is generous rather than tight.
    pub poll_safety_cap: Duration,
    /// Image count at or above which parallel strategies are preferred.
    pub parallel_threshold: usize,
    /// Caller-pinned worker count; `None` means auto-calculate.
    pub max_workers: Option<usize>,
    /// How long final batch counts stay readable after completion before the
    /// job slot is reset.
    pub ledger_grace: Duration,
}

/// Main controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub batch: BatchConfig,
    pub selection_policy: SelectionPolicy,
    pub log_level: Level,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let selection_policy = env::var("SELECTION_POLICY")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "fallback_first" => Some(SelectionPolicy::FallbackToFirst),
                "require_explicit" => Some(SelectionPolicy::RequireExplicit),
                _ => None,
            })
            .unwrap_or_default();

        Ok(Self {
            service: ServiceConfig {
                base_url: env::var("SERVICE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string()),
                connect_timeout: Duration::from_secs(
                    env::var("CONNECT_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(10),
                ),
                request_timeout: Duration::from_secs(
                    env::var("REQUEST_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(300),
                ),
            },
            batch: BatchConfig {
                poll_interval: Duration::from_millis(
                    env::var("POLL_INTERVAL_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(200),
                ),
                poll_safety_cap: Duration::from_secs(
                    env::var("POLL_SAFETY_CAP_SECONDS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(1800),
                ),
                parallel_threshold: env::var("PARALLEL_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(4),
                max_workers: env::var("MAX_WORKERS").ok().and_then(|s| s.parse().ok()),
                ledger_grace: Duration::from_millis(
                    env::var("LEDGER_GRACE_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(500),
                ),
            },
            selection_policy,
            log_level,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.service.base_url.starts_with("http://")
            && !self.service.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidBaseUrl(self.service.base_url.clone()));
        }

        if self.batch.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }

        if self.batch.parallel_threshold == 0 {
            return Err(ConfigError::InvalidParallelThreshold);
        }

        if let Some(workers) = self.batch.max_workers {
            if !(WORKER_MIN..=WORKER_MAX).contains(&workers) {
                return Err(ConfigError::InvalidWorkerCount {
                    min: WORKER_MIN,
                    max: WORKER_MAX,
                    got: workers,
                });
            }
        }

        Ok(())
    }

    /// Effective worker count for a batch of `num_images`.
    ///
    /// A pinned count is clamped to [1, 8] and to the image count. Otherwise
    /// 60% of the available CPUs, capped the same way.
    pub fn effective_workers(&self, num_images: usize) -> usize {
        let requested = self.batch.max_workers.unwrap_or_else(|| {
            let cpus = num_cpus::get();
            std::cmp::max(1, (cpus * 3) / 5)
        });
        requested.clamp(WORKER_MIN, WORKER_MAX).min(num_images.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_workers: Option<usize>) -> Config {
        Config {
            service: ServiceConfig {
                base_url: "http://localhost:5000".to_string(),
                connect_timeout: Duration::from_secs(10),
                request_timeout: Duration::from_secs(300),
            },
            batch: BatchConfig {
                poll_interval: Duration::from_millis(200),
                poll_safety_cap: Duration::from_secs(1800),
                parallel_threshold: 4,
                max_workers,
                ledger_grace: Duration::from_millis(500),
            },
            selection_policy: SelectionPolicy::FallbackToFirst,
            log_level: Level::INFO,
        }
    }

    #[test]
    fn pinned_workers_clamped_to_bounds_and_image_count() {
        let config = test_config(Some(8));
        assert_eq!(config.effective_workers(3), 3);
        assert_eq!(config.effective_workers(20), 8);
    }

    #[test]
    fn auto_workers_never_below_one() {
        let config = test_config(None);
        assert!(config.effective_workers(1) >= 1);
        assert!(config.effective_workers(100) <= WORKER_MAX);
    }

    #[test]
    fn validate_rejects_out_of_range_workers() {
        let mut config = test_config(Some(9));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));
        config.batch.max_workers = Some(8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let mut config = test_config(None);
        config.service.base_url = "ftp://somewhere".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn correction_defaults_match_service_defaults() {
        let config = CorrectionConfig::default();
        assert_eq!(config.ffc.bins, 50);
        assert_eq!(config.gc.max_degree, 5);
        assert_eq!(config.cc.method, "Finlayson 2015");
        assert_eq!(config.cc.hidden_layers, vec![64, 32, 16]);
        assert_eq!(config.method.as_str(), "pls");
    }

    #[test]
    fn enabled_stages_follow_flags() {
        use crate::core::types::StageKind;
        let mut config = CorrectionConfig::default();
        config.gc_enabled = true;
        config.cc_enabled = true;
        assert_eq!(config.enabled_stages(), vec![StageKind::Gc, StageKind::Cc]);
    }
}
