use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

use analyst_core::{
    AttemptReport, DatasetContext, Downgrade, ProviderConfig, SessionMemoryStore,
    TokenBudgetController,
};
use analyst_llm::{EventBus, ResilientExecutor, RetryPolicy};

use crate::config::AnalystLoopConfig;

/// One loaded dataset and everything that belongs to it.
///
/// The executor is derived from the provider config; every config change goes
/// through the budget controller and rebuilds it.
pub struct Session {
    id: String,
    dataset: Arc<DatasetContext>,
    memory: SessionMemoryStore,
    provider: ProviderConfig,
    fallback: Option<ProviderConfig>,
    budget: TokenBudgetController,
    retry: RetryPolicy,
    events: Option<EventBus>,
    executor: ResilientExecutor,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, dataset: DatasetContext, config: &AnalystLoopConfig) -> Self {
        let clamped = config.budget.clamp(&config.primary);
        let mut memory = SessionMemoryStore::new(config.memory_limits);
        memory.set_dataset_info(dataset.summary_line());

        let executor = build_executor(
            &config.retry,
            &config.budget,
            config.fallback.clone(),
            config.events.clone(),
        );

        Self {
            id: id.into(),
            dataset: Arc::new(dataset),
            memory,
            provider: clamped.config,
            fallback: config.fallback.clone(),
            budget: config.budget.clone(),
            retry: config.retry.clone(),
            events: config.events.clone(),
            executor,
            created_at: Utc::now(),
        }
    }

    /// Replaces memory with a restored store, re-attaching the dataset line.
    pub fn with_memory(mut self, mut memory: SessionMemoryStore) -> Self {
        memory.set_dataset_info(self.dataset.summary_line());
        self.memory = memory;
        self
    }

    fn rebuild_executor(&mut self) {
        self.executor = build_executor(
            &self.retry,
            &self.budget,
            self.fallback.clone(),
            self.events.clone(),
        );
    }

    /// Switches the primary provider. The config is clamped first.
    pub fn set_provider(&mut self, config: ProviderConfig) -> Option<Downgrade> {
        let clamped = self.budget.clamp(&config);
        info!(
            "Session {} provider set to {} ({}, max_tokens={})",
            self.id,
            clamped.config.provider_id(),
            clamped.config.model_name(),
            clamped.config.max_tokens()
        );
        self.provider = clamped.config;
        self.rebuild_executor();
        clamped.downgrade
    }

    pub fn set_fallback(&mut self, fallback: Option<ProviderConfig>) {
        self.fallback = fallback;
        self.rebuild_executor();
    }

    /// Makes the fallback the session's provider after it answered a call
    /// the primary could not. Returns the notice shown to the user.
    pub(crate) fn adopt_fallback(&mut self, report: &AttemptReport) -> Option<String> {
        if !report.fallback_used || report.provider_id == self.provider.provider_id() {
            return None;
        }
        let fallback = self.fallback.take()?;
        let previous = self.provider.provider_id();

        self.provider = self.budget.clamp(&fallback).config;
        self.rebuild_executor();
        info!(
            "Session {} switched from {} to {} for the rest of the session",
            self.id,
            previous,
            self.provider.provider_id()
        );

        Some(format!(
            "Note: {} was unavailable, so this session now uses {} ({}).",
            previous,
            self.provider.provider_id(),
            self.provider.model_name()
        ))
    }

    /// Empties memory, keeping the dataset attached.
    pub fn reset(&mut self) {
        self.memory.clear();
        self.memory.set_dataset_info(self.dataset.summary_line());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dataset(&self) -> &DatasetContext {
        &self.dataset
    }

    pub fn dataset_arc(&self) -> Arc<DatasetContext> {
        Arc::clone(&self.dataset)
    }

    pub fn memory(&self) -> &SessionMemoryStore {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut SessionMemoryStore {
        &mut self.memory
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn fallback_config(&self) -> Option<&ProviderConfig> {
        self.fallback.as_ref()
    }

    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn build_executor(
    retry: &RetryPolicy,
    budget: &TokenBudgetController,
    fallback: Option<ProviderConfig>,
    events: Option<EventBus>,
) -> ResilientExecutor {
    let executor = ResilientExecutor::new(retry.clone())
        .with_budget(budget.clone())
        .with_fallback(fallback);
    match events {
        Some(events) => executor.with_events(events),
        None => executor,
    }
}
