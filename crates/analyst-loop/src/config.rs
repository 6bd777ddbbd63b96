use std::sync::Arc;
use std::time::Duration;

use analyst_core::{
    AnalystConfig, ConfigError, JsonMemoryStorage, MemoryLimits, MemoryStorage, ProviderConfig,
    TokenBudgetController,
};
use analyst_llm::{EventBus, RetryPolicy};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Configuration shared by every session of a manager.
#[derive(Clone)]
pub struct AnalystLoopConfig {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
    pub budget: TokenBudgetController,
    pub retry: RetryPolicy,
    pub memory_limits: MemoryLimits,
    /// Whole-request deadline; cancels the request when it elapses.
    pub request_timeout: Duration,
    /// Optional storage for persisting session memory
    pub storage: Option<Arc<dyn MemoryStorage>>,
    /// Optional executor event bus
    pub events: Option<EventBus>,
}

impl AnalystLoopConfig {
    pub fn new(primary: ProviderConfig) -> Self {
        Self {
            primary,
            fallback: None,
            budget: TokenBudgetController::new(),
            retry: RetryPolicy::default(),
            memory_limits: MemoryLimits::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            storage: None,
            events: None,
        }
    }

    /// Builds the loop config from the resolved file/env configuration,
    /// with JSON memory files under the configured memory directory.
    pub fn from_config(config: &AnalystConfig) -> Result<Self, ConfigError> {
        let memory_dir = config.memory_dir();
        log::info!("Session memory stored at: {:?}", memory_dir);

        Ok(Self {
            primary: config.primary_config()?,
            fallback: config.fallback_config()?,
            budget: config.budget_controller()?,
            retry: RetryPolicy::from(&config.retry),
            memory_limits: config.memory.limits(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds.max(1)),
            storage: Some(Arc::new(JsonMemoryStorage::new(memory_dir))),
            events: None,
        })
    }

    pub fn with_fallback(mut self, fallback: ProviderConfig) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn MemoryStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }
}
