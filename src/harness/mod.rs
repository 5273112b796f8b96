pub mod orchestrator;
pub mod types;

pub use orchestrator::Orchestrator;
pub use types::{
    Cancelled, HarnessConfig, HarnessError, HarnessResult, RetryPolicy, RunPlan, Step, TestIdentity,
};
