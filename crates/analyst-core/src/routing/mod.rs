//! Question routing.
//!
//! [`IntentRouter::classify`] turns a question into an [`AnalysisPlan`]
//! using the fixed priority table in [`keywords::CATEGORY_PRIORITY`]:
//! the first category with a matching term decides the visualization kind.

pub mod keywords;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Question;
use keywords::{
    any_term, Category, CategoryId, CATEGORY_PRIORITY, GENDER_TERMS, METADATA_TERMS,
    SURVIVAL_COLUMN, SURVIVAL_TERMS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationKind {
    None,
    Survival,
    SurvivalByGender,
    Correlation,
    Distribution,
    General,
}

impl fmt::Display for VisualizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VisualizationKind::None => "none",
            VisualizationKind::Survival => "survival",
            VisualizationKind::SurvivalByGender => "survival_by_gender",
            VisualizationKind::Correlation => "correlation",
            VisualizationKind::Distribution => "distribution",
            VisualizationKind::General => "general",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    AnalysisOnly,
    VisualizationOnly,
    Combined,
}

impl Strategy {
    pub fn from_flags(needs_visualization: bool, needs_analysis: bool) -> Self {
        match (needs_visualization, needs_analysis) {
            (true, true) => Strategy::Combined,
            (true, false) => Strategy::VisualizationOnly,
            (false, _) => Strategy::AnalysisOnly,
        }
    }
}

/// Routing decision for one question.
///
/// Fields are private so `strategy` always matches the flags and a
/// visualization kind never appears without `needs_visualization`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisPlan {
    needs_visualization: bool,
    needs_analysis: bool,
    visualization_kind: VisualizationKind,
    referenced_columns: Vec<String>,
    strategy: Strategy,
    metadata_query: bool,
}

impl AnalysisPlan {
    fn new(
        visualization_kind: VisualizationKind,
        needs_analysis: bool,
        referenced_columns: Vec<String>,
        metadata_query: bool,
    ) -> Self {
        let needs_visualization = visualization_kind != VisualizationKind::None;
        Self {
            needs_visualization,
            needs_analysis,
            visualization_kind,
            referenced_columns,
            strategy: Strategy::from_flags(needs_visualization, needs_analysis),
            metadata_query,
        }
    }

    /// Plain narrative plan with no chart, used for session conclusions.
    pub fn analysis_only() -> Self {
        Self::new(VisualizationKind::None, true, Vec::new(), false)
    }

    /// Drops the narrative step. A plan without a chart gets a general one.
    pub fn visualization_only(self) -> Self {
        let kind = match self.visualization_kind {
            VisualizationKind::None => VisualizationKind::General,
            kind => kind,
        };
        Self::new(kind, false, self.referenced_columns, false)
    }

    pub fn needs_visualization(&self) -> bool {
        self.needs_visualization
    }

    pub fn needs_analysis(&self) -> bool {
        self.needs_analysis
    }

    pub fn visualization_kind(&self) -> VisualizationKind {
        self.visualization_kind
    }

    pub fn referenced_columns(&self) -> &[String] {
        &self.referenced_columns
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// True when the question only asks which dataset is loaded.
    pub fn is_metadata_query(&self) -> bool {
        self.metadata_query
    }
}

/// Keyword-table classifier.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    categories: &'static [Category],
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentRouter {
    pub fn new() -> Self {
        Self {
            categories: CATEGORY_PRIORITY,
        }
    }

    pub fn categories(&self) -> &[Category] {
        self.categories
    }

    /// First category, in priority order, with a matching term.
    pub fn matched_category(&self, lowered: &str) -> Option<&Category> {
        self.categories
            .iter()
            .find(|category| any_term(category.terms, lowered))
    }

    pub fn classify(&self, question: &Question, dataset_columns: &[String]) -> AnalysisPlan {
        let lowered = question.text().to_lowercase();

        let mut kind = self
            .matched_category(&lowered)
            .map(|category| category.kind)
            .unwrap_or(VisualizationKind::None);

        let referenced_columns: Vec<String> = dataset_columns
            .iter()
            .filter(|column| !column.is_empty())
            .filter(|column| lowered.contains(&column.to_lowercase()))
            .cloned()
            .collect();

        let mentions_gender = any_term(GENDER_TERMS, &lowered);
        let mentions_survival = any_term(SURVIVAL_TERMS, &lowered);
        let has_survival_column = dataset_columns.iter().any(|c| c == SURVIVAL_COLUMN);
        if mentions_gender && (mentions_survival || has_survival_column) {
            kind = VisualizationKind::SurvivalByGender;
        }

        let metadata_query = kind == VisualizationKind::None && any_term(METADATA_TERMS, &lowered);

        log::debug!(
            "Routed question to {} (columns: {:?}, metadata: {})",
            kind,
            referenced_columns,
            metadata_query
        );

        AnalysisPlan::new(kind, true, referenced_columns, metadata_query)
    }

    /// Category id that drove a classification, for diagnostics.
    pub fn explain(&self, question: &Question) -> Option<CategoryId> {
        let lowered = question.text().to_lowercase();
        self.matched_category(&lowered).map(|category| category.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn classify(text: &str, cols: &[&str]) -> AnalysisPlan {
        IntentRouter::new().classify(&Question::new(text), &columns(cols))
    }

    #[test]
    fn file_question_is_analysis_only() {
        let plan = classify(
            "Qual arquivo CSV estamos analisando?",
            &["PassengerId", "Survived", "Sex"],
        );
        assert!(!plan.needs_visualization());
        assert_eq!(plan.strategy(), Strategy::AnalysisOnly);
        assert_eq!(plan.visualization_kind(), VisualizationKind::None);
        assert!(plan.is_metadata_query());
    }

    #[test]
    fn correlation_matrix_request() {
        let plan = classify("cria matriz de correlação", &["Age", "Fare", "Pclass"]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::Correlation);
        assert_eq!(plan.strategy(), Strategy::Combined);
        assert!(!plan.is_metadata_query());
    }

    #[test]
    fn survival_by_gender_override() {
        let plan = classify("sobrevivência por gênero", &["Sex", "Survived", "Age"]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::SurvivalByGender);
        assert!(plan.needs_visualization());
    }

    #[test]
    fn gender_with_survived_column_overrides_other_categories() {
        let plan = classify("compare women and men", &["Sex", "Survived"]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::SurvivalByGender);

        let plan = classify("compare women and men", &["Sex", "Income"]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::General);
    }

    #[test]
    fn first_match_wins() {
        // explicit chart request outranks correlation
        let plan = classify("faça um gráfico de correlação", &[]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::General);

        // survival outranks distribution
        let plan = classify("distribuição de sobreviventes", &[]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::Survival);
    }

    #[test]
    fn distribution_and_comparison() {
        assert_eq!(
            classify("show the histogram of age", &[]).visualization_kind(),
            VisualizationKind::Distribution
        );
        assert_eq!(
            classify("age vs fare", &[]).visualization_kind(),
            VisualizationKind::General
        );
    }

    #[test]
    fn no_keywords_means_analysis_only() {
        let plan = classify("quantas linhas tem o dataset?", &["a", "b"]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::None);
        assert_eq!(plan.strategy(), Strategy::AnalysisOnly);
        assert!(plan.needs_analysis());
    }

    #[test]
    fn referenced_columns_follow_dataset_order() {
        let plan = classify(
            "what is the mean fare and age per pclass?",
            &["Pclass", "Age", "Name", "Fare"],
        );
        assert_eq!(plan.referenced_columns(), &columns(&["Pclass", "Age", "Fare"])[..]);
    }

    #[test]
    fn empty_columns_are_fine() {
        let plan = classify("show a chart", &[]);
        assert!(plan.referenced_columns().is_empty());
        assert_eq!(plan.visualization_kind(), VisualizationKind::General);
    }

    #[test]
    fn classification_is_deterministic() {
        let router = IntentRouter::new();
        let cols = columns(&["Sex", "Survived", "Age"]);
        let question = Question::new("Mostre a distribuição de Age por sexo");
        let first = router.classify(&question, &cols);
        for _ in 0..10 {
            assert_eq!(router.classify(&question, &cols), first);
        }
    }

    #[test]
    fn visualization_only_keeps_invariants() {
        let plan = classify("quantas linhas?", &[]).visualization_only();
        assert_eq!(plan.strategy(), Strategy::VisualizationOnly);
        assert_eq!(plan.visualization_kind(), VisualizationKind::General);
        assert!(!plan.needs_analysis());

        let plan = classify("heatmap please", &[]).visualization_only();
        assert_eq!(plan.visualization_kind(), VisualizationKind::Correlation);
    }

    #[test]
    fn scatter_is_an_explicit_chart_request() {
        let plan = classify("faça um scatter de idade e tarifa", &[]);
        assert_eq!(plan.visualization_kind(), VisualizationKind::General);
        assert_eq!(plan.strategy(), Strategy::Combined);
    }

    #[test]
    fn explain_reports_category() {
        let router = IntentRouter::new();
        assert_eq!(
            router.explain(&Question::new("plot the fares")),
            Some(CategoryId::ExplicitChartRequest)
        );
        assert_eq!(router.explain(&Question::new("hello")), None);
    }
}
