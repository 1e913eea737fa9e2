pub mod batch_coordinator;
pub mod progress;

pub use batch_coordinator::{
    choose_strategy, BatchCoordinator, BatchReport, BatchStrategy, ProgressView,
};
pub use progress::{OutcomeLedger, ProgressTracker};
