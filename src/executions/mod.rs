pub mod domain;
pub mod recorder;
pub mod repository;
pub mod stats;

pub use domain::{ExecutionOutcome, ExecutionRecord};
pub use recorder::{ExecutionError, ExecutionInput, ExecutionRecorder};
pub use repository::{ExecutionRepository, ExecutionRepositoryError, HistoryFilter};
pub use stats::{OrganizationTotals, RuleStats};
