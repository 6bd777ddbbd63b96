pub mod classify;
pub mod error;
pub mod events;
pub mod executor;
pub mod operation;

pub use classify::{classify, parse_wait_seconds, DEFAULT_WAIT_SECONDS};
pub use error::ProviderError;
pub use events::{EventBus, EventMeta, ExecutorEvent};
pub use executor::{ResilientExecutor, RetryPolicy};
pub use operation::Operation;
