//! Merges the step results of a plan into one answer.

use crate::error::ErrorKind;
use crate::routing::{AnalysisPlan, VisualizationKind};
use crate::types::OperationResult;

pub const DIVIDER: &str = "\n\n---\n\n";

const NO_ANSWER: &str = "No answer could be produced for this question.";

/// Follow-up suggestions per visualization kind.
const SUGGESTIONS: &[(VisualizationKind, &[&str])] = &[
    (
        VisualizationKind::Survival,
        &[
            "Break survival down by passenger class.",
            "Compare survival rates across age groups.",
        ],
    ),
    (
        VisualizationKind::SurvivalByGender,
        &[
            "Combine gender with passenger class to see interaction effects.",
            "Check whether age changes the gender gap in survival.",
        ],
    ),
    (
        VisualizationKind::Correlation,
        &[
            "Look closer at pairs with correlation above 0.7 or below -0.7.",
            "Plot a scatter chart for the strongest pair.",
        ],
    ),
    (
        VisualizationKind::Distribution,
        &[
            "Check the outliers at the tails of the distribution.",
            "Compare the distribution across a categorical column.",
        ],
    ),
];

const DEFAULT_SUGGESTIONS: &[&str] = &[
    "Ask for descriptive statistics of the numeric columns.",
    "Ask for a correlation matrix to see how variables relate.",
    "Ask for the session conclusions when you are done.",
];

pub fn suggestions_for(kind: VisualizationKind) -> &'static [&'static str] {
    SUGGESTIONS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map(|(_, suggestions)| *suggestions)
        .unwrap_or(DEFAULT_SUGGESTIONS)
}

#[derive(Debug, Clone, Default)]
pub struct ResponseConsolidator;

impl ResponseConsolidator {
    pub fn new() -> Self {
        Self
    }

    pub fn consolidate(&self, plan: &AnalysisPlan, results: &[OperationResult]) -> String {
        let bodies: Vec<String> = results
            .iter()
            .filter_map(|result| match result {
                OperationResult::Success { output, .. } => Some(output.body()),
                OperationResult::Failure { .. } => None,
            })
            .filter(|body| !body.trim().is_empty())
            .collect();

        let failures: Vec<&ErrorKind> = results.iter().filter_map(|r| r.error()).collect();

        if bodies.is_empty() {
            return failure_message(&failures);
        }

        let mut answer = bodies.join(DIVIDER);

        if !failures.is_empty() {
            answer.push_str(DIVIDER);
            answer.push_str("**Some steps could not be completed:**");
            for hint in distinct_hints(&failures) {
                answer.push_str(&format!("\n- {}", hint));
            }
        }

        answer.push_str(DIVIDER);
        answer.push_str("**Suggested next steps:**");
        for suggestion in suggestions_for(plan.visualization_kind()) {
            answer.push_str(&format!("\n- {}", suggestion));
        }
        answer
    }
}

fn failure_message(failures: &[&ErrorKind]) -> String {
    let mut message = NO_ANSWER.to_string();
    for hint in distinct_hints(failures) {
        message.push_str(&format!("\n- {}", hint));
    }
    message
}

fn distinct_hints(failures: &[&ErrorKind]) -> Vec<&'static str> {
    let mut hints: Vec<&'static str> = Vec::new();
    for failure in failures {
        let hint = failure.remediation();
        if !hints.contains(&hint) {
            hints.push(hint);
        }
    }
    hints
}
