pub mod error;
pub mod models;
pub mod services;
pub mod testing;

pub use error::{OrchestratorError, Result};
pub use services::orchestrator::ApplicationOrchestrator;
