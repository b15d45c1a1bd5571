pub mod api;
pub mod config;
pub mod leads;
pub mod model;
pub mod orchestrator;
pub mod registry;

pub use model::{RunId, RunState, RunStatus, RunStep, StepStatus};
pub use orchestrator::Orchestrator;
pub use registry::RunRegistry;
