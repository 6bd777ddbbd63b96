//! Drives one question (or the closing conclusions) through a session.

use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use analyst_core::consolidate::DIVIDER;
use analyst_core::{
    AnalysisPlan, AttemptReport, ErrorKind, IntentRouter, MemoryEntry, OperationOutput,
    OperationResult, Question, ResponseConsolidator,
};

use crate::engine::{validate_step, CapabilityEngine, StepKind, StepOperation, StepRequest};
use crate::session::Session;

const CONCLUSIONS_PROMPT: &str =
    "Summarise the main findings of this session into final conclusions.";

/// Result of one request against a session.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub plan: AnalysisPlan,
    pub results: Vec<OperationResult>,
    /// Set when the session switched provider while answering.
    pub provider_notice: Option<String>,
}

impl Answer {
    pub fn is_success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(OperationResult::is_success)
    }
}

/// Answers `question`. With `visualization_only` the narrative step is skipped
/// and a chart is always produced.
pub async fn run_question(
    session: &mut Session,
    engine: &dyn CapabilityEngine,
    router: &IntentRouter,
    question: &Question,
    visualization_only: bool,
    cancel: &CancellationToken,
) -> Answer {
    let mut plan = router.classify(question, &session.dataset().columns);
    if visualization_only {
        plan = plan.visualization_only();
    }

    if cancel.is_cancelled() {
        return cancelled_answer(session, plan);
    }

    if plan.is_metadata_query() {
        info!("Session {}: answering dataset question locally", session.id());
        let text = session.dataset().metadata_answer();
        let result = OperationResult::Success {
            output: OperationOutput::text(text.clone()),
            report: AttemptReport::new(session.provider_config()),
        };
        return Answer {
            text,
            plan,
            results: vec![result],
            provider_notice: None,
        };
    }

    let mut steps = Vec::new();
    if plan.needs_analysis() {
        steps.push(StepKind::Analysis);
    }
    if plan.needs_visualization() {
        steps.push(StepKind::Visualization {
            kind: plan.visualization_kind(),
        });
    }

    let memory_summary = session.memory().default_summary();
    let mut results = Vec::with_capacity(steps.len());
    let mut provider_notice = None;

    for kind in steps {
        let request = StepRequest {
            kind,
            question: question.text().to_string(),
            columns: plan.referenced_columns().to_vec(),
            dataset: session.dataset_arc(),
            memory_summary: memory_summary.clone(),
        };

        let result = run_step(session, engine, &request, cancel).await;

        if let OperationResult::Success { output, report } = &result {
            let entry = match kind {
                StepKind::Visualization { kind } => {
                    format!("{}\n{} chart: {}", question.text(), kind, output.body())
                }
                _ => format!("{}\n{}", question.text(), output.body()),
            };
            session.memory_mut().append(MemoryEntry::analysis(entry));
            if let Some(notice) = session.adopt_fallback(report) {
                provider_notice = Some(notice);
            }
        }

        let cancelled = result.error() == Some(&ErrorKind::Cancelled);
        results.push(result);
        if cancelled {
            break;
        }
    }

    let mut text = ResponseConsolidator::new().consolidate(&plan, &results);
    if let Some(notice) = &provider_notice {
        text.push_str(DIVIDER);
        text.push_str(notice);
    }

    Answer {
        text,
        plan,
        results,
        provider_notice,
    }
}

/// Produces closing conclusions from the session memory summary.
pub async fn run_conclusions(
    session: &mut Session,
    engine: &dyn CapabilityEngine,
    cancel: &CancellationToken,
) -> Answer {
    let plan = AnalysisPlan::analysis_only();
    if cancel.is_cancelled() {
        return cancelled_answer(session, plan);
    }

    let request = StepRequest {
        kind: StepKind::Conclusions,
        question: CONCLUSIONS_PROMPT.to_string(),
        columns: Vec::new(),
        dataset: session.dataset_arc(),
        memory_summary: session.memory().default_summary(),
    };

    let result = run_step(session, engine, &request, cancel).await;

    let mut provider_notice = None;
    let text = match &result {
        OperationResult::Success { output, report } => {
            let body = output.body();
            session
                .memory_mut()
                .append(MemoryEntry::conclusion(body.clone()));
            provider_notice = session.adopt_fallback(report);
            let mut text = format!("**Final conclusions - {}:**\n\n{}", session.dataset().name, body);
            if let Some(notice) = &provider_notice {
                text.push_str(DIVIDER);
                text.push_str(notice);
            }
            text
        }
        OperationResult::Failure { .. } => {
            ResponseConsolidator::new().consolidate(&plan, std::slice::from_ref(&result))
        }
    };

    Answer {
        text,
        plan,
        results: vec![result],
        provider_notice,
    }
}

/// Answer for a request whose token was cancelled before it could start.
fn cancelled_answer(session: &Session, plan: AnalysisPlan) -> Answer {
    info!("Session {}: request cancelled before it started", session.id());
    let result = OperationResult::Failure {
        error: ErrorKind::Cancelled,
        detail: "request cancelled".to_string(),
        report: AttemptReport::new(session.provider_config()),
    };
    let text = ResponseConsolidator::new().consolidate(&plan, std::slice::from_ref(&result));
    Answer {
        text,
        plan,
        results: vec![result],
        provider_notice: None,
    }
}

async fn run_step(
    session: &Session,
    engine: &dyn CapabilityEngine,
    request: &StepRequest,
    cancel: &CancellationToken,
) -> OperationResult {
    if let Err(reason) = validate_step(request) {
        warn!(
            "Session {}: {} step rejected: {}",
            session.id(),
            request.kind.name(),
            reason
        );
        return OperationResult::Failure {
            error: ErrorKind::Validation {
                reason: reason.clone(),
            },
            detail: reason,
            report: AttemptReport::new(session.provider_config()),
        };
    }

    let operation = StepOperation::new(engine, request);
    session
        .executor()
        .execute(&operation, session.provider_config(), cancel)
        .await
}
