// Core domain types, configuration, and error taxonomy

pub mod config;
pub mod errors;
pub mod types;

pub use config::{Config, CorrectionConfig, FitMethod, SelectionPolicy};
pub use errors::{ConfigError, Result, TransportError, WorkflowError};
pub use types::{
    BatchSummary, ImageArtifact, ImageRef, ImageStatus, ModelInfo, PipelineResult, StageKind,
    StageMetrics,
};
