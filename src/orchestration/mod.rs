pub mod engine;
pub mod error;
pub mod runtime;

pub use engine::{
    AutomationEngine, AwaitReason, EngineDeps, ProcessOutcome, ResolutionStatus, ResponseDecision,
};
pub use error::OrchestratorError;
pub use runtime::OrganizationRuntime;
