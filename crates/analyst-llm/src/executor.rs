//! Retry, backoff and provider fallback around a single operation.

use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use analyst_core::{
    AttemptReport, ErrorKind, OperationOutput, OperationResult, ProviderConfig, RetrySettings,
    TokenBudgetController,
};

use crate::classify::{classify, DEFAULT_WAIT_SECONDS};
use crate::events::{EventBus, EventMeta, ExecutorEvent};
use crate::operation::Operation;

/// Backoff parameters shared by every call of one executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Wait assumed when a rate limit carries no hint.
    pub default_wait_seconds: u64,
    /// Longest sleep the executor will take before a local retry.
    pub max_wait_seconds: u64,
    /// Fixed pause before retrying a timeout or unknown failure.
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_wait_seconds: DEFAULT_WAIT_SECONDS,
            max_wait_seconds: 30,
            transient_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            default_wait_seconds: settings.default_wait_seconds,
            max_wait_seconds: settings.max_wait_seconds.max(1),
            transient_delay: Duration::from_millis(settings.transient_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retrying a `RateLimit(wait_seconds)`.
    ///
    /// `None` when the provider asks for more than the cap: a shorter sleep
    /// would only hit the same limit again.
    pub fn rate_limit_delay(&self, wait_seconds: u64) -> Option<Duration> {
        if wait_seconds > self.max_wait_seconds {
            return None;
        }
        Some(Duration::from_secs(
            (wait_seconds + 1).min(self.max_wait_seconds),
        ))
    }
}

struct Failed {
    kind: ErrorKind,
    detail: String,
}

impl Failed {
    fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            detail: "cancelled by caller".to_string(),
        }
    }
}

/// Runs operations with classification, bounded retries and fallback.
///
/// The executor holds no per-call state; a session rebuilds it whenever its
/// provider config changes.
pub struct ResilientExecutor {
    policy: RetryPolicy,
    budget: TokenBudgetController,
    fallback: Option<ProviderConfig>,
    events: Option<EventBus>,
}

impl ResilientExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            budget: TokenBudgetController::new(),
            fallback: None,
            events: None,
        }
    }

    pub fn with_budget(mut self, budget: TokenBudgetController) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_fallback(mut self, fallback: Option<ProviderConfig>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn fallback(&self) -> Option<&ProviderConfig> {
        self.fallback.as_ref()
    }

    pub async fn execute(
        &self,
        op: &dyn Operation,
        config: &ProviderConfig,
        cancel: &CancellationToken,
    ) -> OperationResult {
        let mut report = AttemptReport::new(config);

        let primary = match self.run_attempts(op, config, cancel, &mut report).await {
            Ok(output) => return self.succeed(op, output, report),
            Err(failed) => failed,
        };

        let Some(fallback) = self.escalation_target(&primary.kind, config) else {
            return self.fail(op, primary, report);
        };
        let fallback = self.budget.clamp(fallback).config;

        warn!(
            "{}: {} failed ({}), falling back to {} ({})",
            op.name(),
            config.provider_id(),
            primary.kind,
            fallback.provider_id(),
            fallback.model_name()
        );
        self.emit(ExecutorEvent::FallbackStarted {
            meta: EventMeta::new(),
            operation: op.name().to_string(),
            from: config.provider_id(),
            to: fallback.provider_id(),
        });

        report.provider_id = fallback.provider_id();
        report.model_name = fallback.model_name().to_string();
        report.fallback_used = true;

        match self.run_attempts(op, &fallback, cancel, &mut report).await {
            Ok(output) => self.succeed(op, output, report),
            Err(second) => {
                let detail = format!(
                    "{} failed ({}): {}; fallback {} failed ({}): {}",
                    config.provider_id(),
                    primary.kind,
                    primary.detail,
                    fallback.provider_id(),
                    second.kind,
                    second.detail
                );
                self.fail(
                    op,
                    Failed {
                        kind: second.kind,
                        detail,
                    },
                    report,
                )
            }
        }
    }

    fn escalation_target(
        &self,
        kind: &ErrorKind,
        config: &ProviderConfig,
    ) -> Option<&ProviderConfig> {
        if !matches!(kind, ErrorKind::RateLimit { .. } | ErrorKind::Auth { .. }) {
            return None;
        }
        self.fallback
            .as_ref()
            .filter(|fallback| fallback.provider_id() != config.provider_id())
    }

    async fn run_attempts(
        &self,
        op: &dyn Operation,
        config: &ProviderConfig,
        cancel: &CancellationToken,
        report: &mut AttemptReport,
    ) -> Result<OperationOutput, Failed> {
        let provider = config.provider_id();
        let mut retries = 0u32;
        let mut transient_retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Failed::cancelled());
            }

            report.attempts += 1;
            self.emit(ExecutorEvent::AttemptStarted {
                meta: EventMeta::new(),
                operation: op.name().to_string(),
                provider_id: provider,
                attempt: report.attempts,
            });
            debug!(
                "{}: attempt {} on {} ({}, max_tokens={})",
                op.name(),
                report.attempts,
                provider,
                config.model_name(),
                config.max_tokens()
            );

            let attempt =
                tokio::time::timeout(Duration::from_secs(config.timeout_seconds()), op.run(config));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failed::cancelled()),
                outcome = attempt => outcome,
            };

            let (kind, detail) = match outcome {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(error)) => (
                    classify(&error, provider, self.policy.default_wait_seconds),
                    error.to_string(),
                ),
                Err(_) => (
                    ErrorKind::Timeout,
                    format!("no response within {}s", config.timeout_seconds()),
                ),
            };

            self.emit(ExecutorEvent::AttemptFailed {
                meta: EventMeta::new(),
                operation: op.name().to_string(),
                provider_id: provider,
                attempt: report.attempts,
                error: kind.clone(),
            });

            let delay = match &kind {
                ErrorKind::RateLimit { wait_seconds } if retries < config.max_retries() => {
                    let delay = self.policy.rate_limit_delay(*wait_seconds);
                    if delay.is_none() {
                        warn!(
                            "{}: {} asks for {}s, above the {}s cap; not retrying locally",
                            op.name(),
                            provider,
                            wait_seconds,
                            self.policy.max_wait_seconds
                        );
                    }
                    delay
                }
                ErrorKind::Timeout | ErrorKind::Unknown { .. }
                    if retries < config.max_retries()
                        && transient_retries < config.max_retries().min(1) =>
                {
                    transient_retries += 1;
                    Some(self.policy.transient_delay)
                }
                _ => None,
            };

            let Some(delay) = delay else {
                return Err(Failed { kind, detail });
            };

            retries += 1;
            warn!(
                "{}: {} on {}, retry {}/{} in {:?}",
                op.name(),
                kind,
                provider,
                retries,
                config.max_retries(),
                delay
            );
            self.emit(ExecutorEvent::Retrying {
                meta: EventMeta::new(),
                operation: op.name().to_string(),
                provider_id: provider,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failed::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn succeed(
        &self,
        op: &dyn Operation,
        output: OperationOutput,
        report: AttemptReport,
    ) -> OperationResult {
        info!(
            "{}: succeeded on {} after {} attempt(s){}",
            op.name(),
            report.provider_id,
            report.attempts,
            if report.fallback_used { " via fallback" } else { "" }
        );
        self.emit(ExecutorEvent::Succeeded {
            meta: EventMeta::new(),
            operation: op.name().to_string(),
            provider_id: report.provider_id,
            attempts: report.attempts,
            fallback_used: report.fallback_used,
        });
        OperationResult::Success { output, report }
    }

    fn fail(&self, op: &dyn Operation, failed: Failed, report: AttemptReport) -> OperationResult {
        warn!("{}: giving up: {}", op.name(), failed.detail);
        self.emit(ExecutorEvent::FailedFinal {
            meta: EventMeta::new(),
            operation: op.name().to_string(),
            error: failed.kind.clone(),
            attempts: report.attempts,
        });
        OperationResult::Failure {
            error: failed.kind,
            detail: failed.detail,
            report,
        }
    }

    fn emit(&self, event: ExecutorEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use analyst_core::ProviderId;
    use async_trait::async_trait;
    use tokio::time::Instant;

    use crate::error::ProviderError;

    enum Step {
        Reply(Result<OperationOutput, ProviderError>),
        Hang,
    }

    /// Plays back a fixed script, then succeeds.
    struct ScriptedOperation {
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(Instant, ProviderConfig)>>,
    }

    impl ScriptedOperation {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Instant, ProviderConfig)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Operation for ScriptedOperation {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, config: &ProviderConfig) -> Result<OperationOutput, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), config.clone()));
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(reply)) => reply,
                Some(Step::Hang) => std::future::pending().await,
                None => Ok(OperationOutput::text("done")),
            }
        }
    }

    fn groq() -> ProviderConfig {
        ProviderConfig::with_defaults(ProviderId::Groq, 500).unwrap()
    }

    fn openai() -> ProviderConfig {
        ProviderConfig::with_defaults(ProviderId::OpenAi, 1500).unwrap()
    }

    fn rate_limited(message: &str) -> Step {
        Step::Reply(Err(ProviderError::new(message)))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_time() {
        let op = ScriptedOperation::new(vec![]);
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &groq(), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.report().attempts, 1);
        assert!(!result.report().fallback_used);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_at_least_the_reported_time() {
        let op = ScriptedOperation::new(vec![rate_limited(
            "Rate limit reached. Please try again in 10.895s.",
        )]);
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &groq(), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.report().attempts, 2);
        let calls = op.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].0 - calls[0].0 >= Duration::from_secs(11));
        assert_eq!(calls[1].1, groq());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_escalates_to_fallback() {
        let op = ScriptedOperation::new(vec![
            rate_limited("rate limit, try again in 2s"),
            rate_limited("rate limit, try again in 2s"),
        ]);
        let executor =
            ResilientExecutor::new(RetryPolicy::default()).with_fallback(Some(openai()));
        let result = executor
            .execute(&op, &groq(), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        let report = result.report();
        assert!(report.fallback_used);
        assert_eq!(report.provider_id, ProviderId::OpenAi);
        assert_eq!(report.attempts, 3);
        assert_eq!(op.calls()[2].1.provider_id(), ProviderId::OpenAi);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_above_cap_escalates_without_local_retry() {
        let op = ScriptedOperation::new(vec![rate_limited("rate limit: try again in 2m0s")]);
        let executor =
            ResilientExecutor::new(RetryPolicy::default()).with_fallback(Some(openai()));
        let start = Instant::now();
        let result = executor
            .execute(&op, &groq(), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        assert_eq!(result.report().attempts, 2);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_is_not_retried_but_fallback_is_clamped() {
        let op = ScriptedOperation::new(vec![Step::Reply(Err(ProviderError::unauthorized(
            "Invalid API Key",
        )))]);
        let fallback = ProviderConfig::with_defaults(ProviderId::Groq, 2000).unwrap();
        let executor =
            ResilientExecutor::new(RetryPolicy::default()).with_fallback(Some(fallback));
        let result = executor
            .execute(&op, &openai(), &CancellationToken::new())
            .await;

        assert!(result.is_success());
        let calls = op.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.provider_id(), ProviderId::Groq);
        assert_eq!(calls[1].1.max_tokens(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_without_fallback_fails_after_one_attempt() {
        let op = ScriptedOperation::new(vec![Step::Reply(Err(ProviderError::unauthorized(
            "bad key",
        )))]);
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &openai(), &CancellationToken::new())
            .await;

        assert_eq!(
            result.error(),
            Some(&ErrorKind::Auth {
                provider: "openai".to_string()
            })
        );
        assert_eq!(result.report().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_on_same_provider_is_skipped() {
        let op = ScriptedOperation::new(vec![rate_limited("rate limit"), rate_limited("rate limit")]);
        let executor = ResilientExecutor::new(RetryPolicy::default()).with_fallback(Some(groq()));
        let result = executor
            .execute(&op, &groq(), &CancellationToken::new())
            .await;

        assert_eq!(result.error(), Some(&ErrorKind::RateLimit { wait_seconds: 15 }));
        assert_eq!(result.report().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_once() {
        let op = ScriptedOperation::new(vec![Step::Hang, Step::Hang, Step::Hang]);
        let start = Instant::now();
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &openai(), &CancellationToken::new())
            .await;

        assert_eq!(result.error(), Some(&ErrorKind::Timeout));
        assert_eq!(result.report().attempts, 2);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_errors_are_retried_once() {
        let op = ScriptedOperation::new(vec![
            Step::Reply(Err(ProviderError::new("connection reset"))),
            Step::Reply(Err(ProviderError::new("connection reset"))),
        ]);
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &openai(), &CancellationToken::new())
            .await;

        assert!(matches!(result.error(), Some(ErrorKind::Unknown { .. })));
        assert_eq!(result.report().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_is_never_retried() {
        let op = ScriptedOperation::new(vec![Step::Reply(Err(
            ProviderError::new("unknown column").with_status(422),
        ))]);
        let executor =
            ResilientExecutor::new(RetryPolicy::default()).with_fallback(Some(groq()));
        let result = executor
            .execute(&op, &openai(), &CancellationToken::new())
            .await;

        assert!(matches!(result.error(), Some(ErrorKind::Validation { .. })));
        assert_eq!(op.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let op = ScriptedOperation::new(vec![rate_limited("rate limit exceeded, try again in 20s")]);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &groq(), &cancel)
            .await;

        assert_eq!(result.error(), Some(&ErrorKind::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(op.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_makes_no_attempt() {
        let op = ScriptedOperation::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ResilientExecutor::new(RetryPolicy::default())
            .execute(&op, &groq(), &cancel)
            .await;

        assert_eq!(result.error(), Some(&ErrorKind::Cancelled));
        assert_eq!(result.report().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fallback_combines_diagnostics_and_emits_events() {
        let op = ScriptedOperation::new(vec![
            Step::Reply(Err(ProviderError::unauthorized("groq key revoked"))),
            Step::Reply(Err(ProviderError::unauthorized("openai key revoked"))),
        ]);
        let (bus, mut rx) = EventBus::new(32);
        let executor = ResilientExecutor::new(RetryPolicy::default())
            .with_fallback(Some(openai()))
            .with_events(bus);
        let result = executor
            .execute(&op, &groq(), &CancellationToken::new())
            .await;

        match &result {
            OperationResult::Failure { error, detail, .. } => {
                assert_eq!(
                    error,
                    &ErrorKind::Auth {
                        provider: "openai".to_string()
                    }
                );
                assert!(detail.contains("groq key revoked"));
                assert!(detail.contains("openai key revoked"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let mut saw_fallback = false;
        let mut saw_final = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ExecutorEvent::FallbackStarted { from, to, .. } => {
                    assert_eq!((from, to), (ProviderId::Groq, ProviderId::OpenAi));
                    saw_fallback = true;
                }
                ExecutorEvent::FailedFinal { attempts, .. } => {
                    assert_eq!(attempts, 2);
                    saw_final = true;
                }
                _ => {}
            }
        }
        assert!(saw_fallback && saw_final);
    }

    #[test]
    fn rate_limit_delay_is_wait_plus_one_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.rate_limit_delay(11), Some(Duration::from_secs(12)));
        assert_eq!(policy.rate_limit_delay(30), Some(Duration::from_secs(30)));
        assert_eq!(policy.rate_limit_delay(31), None);
    }
}
