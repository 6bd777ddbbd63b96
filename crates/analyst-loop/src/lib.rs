pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod runner;
pub mod session;

pub use config::AnalystLoopConfig;
pub use engine::{validate_step, CapabilityEngine, StepKind, StepOperation, StepRequest};
pub use error::SessionError;
pub use manager::SessionManager;
pub use runner::{run_conclusions, run_question, Answer};
pub use session::Session;
