pub mod budget;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod memory;
pub mod routing;
pub mod storage;
pub mod types;

pub use budget::{BudgetAssessment, Clamped, Downgrade, TokenBudgetController};
pub use config::{AnalystConfig, ProviderSettings, RetrySettings};
pub use consolidate::ResponseConsolidator;
pub use error::{ConfigError, ErrorKind, MemoryError};
pub use memory::{MemoryEntry, MemoryKind, MemoryLimits, MemoryRecord, SessionMemoryStore};
pub use routing::{AnalysisPlan, IntentRouter, Strategy, VisualizationKind};
pub use storage::{JsonMemoryStorage, MemoryStorage};
pub use types::{
    AttemptReport, ChartRef, DatasetContext, OperationOutput, OperationResult, ProviderConfig,
    ProviderId, Question,
};
