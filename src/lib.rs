// Library exports for the color correction workflow controller
//
// The controller owns orchestration only: session state, batch coordination,
// progress, and save dispatch. All pixel work happens on the remote
// execution service behind the `PipelineClient` trait.

// Core modules
pub mod client;
pub mod core;
pub mod executor;
pub mod middleware;
pub mod orchestration;
pub mod registry;
pub mod report;
pub mod save;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::{Config, CorrectionConfig, FitMethod, SelectionPolicy},
    errors::{ConfigError, Result, TransportError, WorkflowError},
    types::{
        BatchSummary, ImageArtifact, ImageRef, ImageStatus, ModelInfo, PipelineResult,
        StageKind, StageMetrics,
    },
};

pub use client::{HttpPipelineClient, PipelineClient};

pub use executor::SingleRunExecutor;

pub use middleware::{BreakerConfig, BreakerState, CircuitBreaker};

pub use orchestration::{
    choose_strategy, BatchCoordinator, BatchReport, BatchStrategy, OutcomeLedger,
    ProgressTracker, ProgressView,
};

pub use registry::{ImageRegistry, RunGuard};

pub use report::{aggregate, Quality, StageReport};

pub use save::{batch_manifest, interactive_manifest, SaveManifest, SaveSelector};

pub use utils::Metrics;
