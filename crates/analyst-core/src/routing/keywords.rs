//! Keyword tables for intent routing.
//!
//! Terms are matched against the lower-cased question. Portuguese and
//! English terms live side by side.

use super::VisualizationKind;

/// A single matchable term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    /// Matches anywhere in the text, e.g. a word stem.
    Fragment(&'static str),
    /// Matches only a whole word, for short terms that would otherwise hit
    /// unrelated words.
    Word(&'static str),
}

impl Term {
    pub fn matches(&self, lowered: &str) -> bool {
        match self {
            Term::Fragment(fragment) => lowered.contains(fragment),
            Term::Word(word) => lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| token == *word),
        }
    }
}

pub fn any_term(terms: &[Term], lowered: &str) -> bool {
    terms.iter().any(|term| term.matches(lowered))
}

/// Routing categories in their evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryId {
    ExplicitChartRequest,
    Survival,
    Correlation,
    Distribution,
    Comparison,
}

#[derive(Debug, Clone, Copy)]
pub struct Category {
    pub id: CategoryId,
    pub kind: VisualizationKind,
    pub terms: &'static [Term],
}

pub const EXPLICIT_CHART_TERMS: &[Term] = &[
    Term::Fragment("gráfico"),
    Term::Fragment("grafico"),
    Term::Fragment("visualiz"),
    Term::Fragment("diagrama"),
    Term::Fragment("desenhe"),
    Term::Fragment("chart"),
    Term::Fragment("graph"),
    Term::Fragment("scatter"),
    Term::Word("plot"),
    Term::Word("plote"),
    Term::Word("plotar"),
];

pub const SURVIVAL_TERMS: &[Term] = &[
    Term::Fragment("sobreviv"),
    Term::Fragment("survival"),
    Term::Fragment("survived"),
    Term::Fragment("survivor"),
];

pub const CORRELATION_TERMS: &[Term] = &[
    Term::Fragment("correlaç"),
    Term::Fragment("correlac"),
    Term::Fragment("correlat"),
    Term::Fragment("heatmap"),
    Term::Fragment("mapa de calor"),
];

pub const DISTRIBUTION_TERMS: &[Term] = &[
    Term::Fragment("distribui"),
    Term::Fragment("distribution"),
    Term::Fragment("histogram"),
    Term::Fragment("boxplot"),
    Term::Fragment("outlier"),
];

pub const COMPARISON_TERMS: &[Term] = &[
    Term::Fragment("compar"),
    Term::Fragment("versus"),
    Term::Fragment("diferença entre"),
    Term::Fragment("diferenca entre"),
    Term::Fragment("difference between"),
    Term::Word("vs"),
];

pub const GENDER_TERMS: &[Term] = &[
    Term::Fragment("gênero"),
    Term::Fragment("genero"),
    Term::Fragment("gender"),
    Term::Fragment("mulheres"),
    Term::Fragment("homens"),
    Term::Fragment("feminino"),
    Term::Fragment("masculino"),
    Term::Word("sexo"),
    Term::Word("sex"),
    Term::Word("female"),
    Term::Word("male"),
    Term::Word("women"),
    Term::Word("men"),
];

pub const METADATA_TERMS: &[Term] = &[
    Term::Fragment("qual arquivo"),
    Term::Fragment("que arquivo"),
    Term::Fragment("arquivo csv"),
    Term::Fragment("qual dataset"),
    Term::Fragment("que dataset"),
    Term::Fragment("qual é o arquivo"),
    Term::Fragment("nome do arquivo"),
    Term::Fragment("estamos analisando"),
    Term::Fragment("arquivo em análise"),
    Term::Fragment("which file"),
    Term::Fragment("what file"),
    Term::Fragment("which dataset"),
    Term::Fragment("file name"),
];

/// Column name that, when present, makes gender questions survival questions.
pub const SURVIVAL_COLUMN: &str = "Survived";

/// Priority table: first matching category wins.
pub const CATEGORY_PRIORITY: &[Category] = &[
    Category {
        id: CategoryId::ExplicitChartRequest,
        kind: VisualizationKind::General,
        terms: EXPLICIT_CHART_TERMS,
    },
    Category {
        id: CategoryId::Survival,
        kind: VisualizationKind::Survival,
        terms: SURVIVAL_TERMS,
    },
    Category {
        id: CategoryId::Correlation,
        kind: VisualizationKind::Correlation,
        terms: CORRELATION_TERMS,
    },
    Category {
        id: CategoryId::Distribution,
        kind: VisualizationKind::Distribution,
        terms: DISTRIBUTION_TERMS,
    },
    Category {
        id: CategoryId::Comparison,
        kind: VisualizationKind::General,
        terms: COMPARISON_TERMS,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_terms_do_not_match_inside_words() {
        assert!(Term::Word("sex").matches("survival by sex"));
        assert!(!Term::Word("sex").matches("sexta-feira"));
        assert!(!Term::Word("men").matches("comments"));
        assert!(Term::Word("vs").matches("age vs fare"));
    }

    #[test]
    fn priority_table_order_is_fixed() {
        let order: Vec<CategoryId> = CATEGORY_PRIORITY.iter().map(|c| c.id).collect();
        assert_eq!(
            order,
            vec![
                CategoryId::ExplicitChartRequest,
                CategoryId::Survival,
                CategoryId::Correlation,
                CategoryId::Distribution,
                CategoryId::Comparison,
            ]
        );
    }
}
