//! The seam between sessions and the analysis/chart engines.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use analyst_core::{DatasetContext, OperationOutput, ProviderConfig, VisualizationKind};
use analyst_llm::{Operation, ProviderError};

/// Column names accepted as the sex/gender column.
const SEX_COLUMNS: &[&str] = &["Sex", "Gender", "Sexo", "Genero", "Gênero"];
const SURVIVAL_COLUMN: &str = "Survived";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepKind {
    Analysis,
    Visualization { kind: VisualizationKind },
    Conclusions,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Analysis => "analysis",
            StepKind::Visualization { .. } => "visualization",
            StepKind::Conclusions => "conclusions",
        }
    }
}

/// Everything an engine needs to run one step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub kind: StepKind,
    pub question: String,
    /// Dataset columns named in the question, in dataset order.
    pub columns: Vec<String>,
    pub dataset: Arc<DatasetContext>,
    pub memory_summary: String,
}

impl StepRequest {
    /// Dataset description followed by the memory summary.
    pub fn context(&self) -> String {
        format!(
            "{}\n\nSession so far:\n{}",
            self.dataset.describe(),
            self.memory_summary
        )
    }
}

/// An analysis or chart backend driven by a provider config.
#[async_trait]
pub trait CapabilityEngine: Send + Sync {
    async fn run_step(
        &self,
        request: &StepRequest,
        config: &ProviderConfig,
    ) -> Result<OperationOutput, ProviderError>;
}

/// Adapts one step to the executor's [`Operation`].
pub struct StepOperation<'a> {
    engine: &'a dyn CapabilityEngine,
    request: &'a StepRequest,
}

impl<'a> StepOperation<'a> {
    pub fn new(engine: &'a dyn CapabilityEngine, request: &'a StepRequest) -> Self {
        Self { engine, request }
    }
}

#[async_trait]
impl Operation for StepOperation<'_> {
    fn name(&self) -> &str {
        self.request.kind.name()
    }

    async fn run(&self, config: &ProviderConfig) -> Result<OperationOutput, ProviderError> {
        self.engine.run_step(self.request, config).await
    }
}

/// Checks a step against the loaded dataset before any provider call.
pub fn validate_step(request: &StepRequest) -> Result<(), String> {
    if request.kind != StepKind::Conclusions && request.question.trim().is_empty() {
        return Err("the question is empty".to_string());
    }

    let dataset = &request.dataset;
    let StepKind::Visualization { kind } = request.kind else {
        return Ok(());
    };

    match kind {
        VisualizationKind::SurvivalByGender => {
            if !SEX_COLUMNS
                .iter()
                .any(|name| dataset.find_column(name).is_some())
            {
                return Err(format!("{} has no sex/gender column", dataset.name));
            }
            if dataset.find_column(SURVIVAL_COLUMN).is_none() {
                return Err(format!("{} has no {} column", dataset.name, SURVIVAL_COLUMN));
            }
        }
        VisualizationKind::Correlation => {
            let numeric = dataset.numeric_columns().len();
            if numeric < 2 {
                return Err(format!(
                    "a correlation needs at least 2 numeric columns, {} has {}",
                    dataset.name, numeric
                ));
            }
        }
        VisualizationKind::Distribution => {
            if dataset.numeric_columns().is_empty() {
                return Err(format!("{} has no numeric columns", dataset.name));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titanic() -> Arc<DatasetContext> {
        Arc::new(
            DatasetContext::new(
                "titanic.csv",
                891,
                vec!["Survived".into(), "Sex".into(), "Age".into(), "Fare".into()],
            )
            .with_dtype("Survived", "int64")
            .with_dtype("Sex", "object")
            .with_dtype("Age", "float64")
            .with_dtype("Fare", "float64"),
        )
    }

    fn request(kind: StepKind, question: &str, dataset: Arc<DatasetContext>) -> StepRequest {
        StepRequest {
            kind,
            question: question.to_string(),
            columns: Vec::new(),
            dataset,
            memory_summary: String::new(),
        }
    }

    fn chart(kind: VisualizationKind) -> StepKind {
        StepKind::Visualization { kind }
    }

    #[test]
    fn empty_question_is_rejected() {
        assert!(validate_step(&request(StepKind::Analysis, "   ", titanic())).is_err());
        assert!(validate_step(&request(StepKind::Conclusions, "", titanic())).is_ok());
    }

    #[test]
    fn survival_by_gender_needs_both_columns() {
        let ok = request(chart(VisualizationKind::SurvivalByGender), "q", titanic());
        assert!(validate_step(&ok).is_ok());

        let no_sex = Arc::new(DatasetContext::new(
            "x.csv",
            3,
            vec!["Survived".into(), "Age".into()],
        ));
        let err = validate_step(&request(chart(VisualizationKind::SurvivalByGender), "q", no_sex))
            .unwrap_err();
        assert!(err.contains("sex/gender"));
    }

    #[test]
    fn numeric_column_requirements() {
        let one_numeric = Arc::new(
            DatasetContext::new("x.csv", 3, vec!["Name".into(), "Age".into()])
                .with_dtype("Age", "int64"),
        );
        assert!(validate_step(&request(
            chart(VisualizationKind::Correlation),
            "q",
            one_numeric.clone()
        ))
        .is_err());
        assert!(validate_step(&request(
            chart(VisualizationKind::Distribution),
            "q",
            one_numeric
        ))
        .is_ok());

        let text_only = Arc::new(DatasetContext::new("x.csv", 3, vec!["Name".into()]));
        assert!(validate_step(&request(
            chart(VisualizationKind::Distribution),
            "q",
            text_only
        ))
        .is_err());
    }

    #[test]
    fn context_includes_memory_summary() {
        let mut req = request(StepKind::Analysis, "q", titanic());
        req.memory_summary = "Dataset: titanic.csv".to_string();
        let context = req.context();
        assert!(context.starts_with("File: titanic.csv"));
        assert!(context.ends_with("Dataset: titanic.csv"));
    }
}
