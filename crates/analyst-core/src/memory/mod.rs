//! Bounded session memory.
//!
//! Keeps the most recent analyses and conclusions of the active session.
//! Content is truncated on the way in, lists are evicted oldest-first, and
//! [`SessionMemoryStore::summary`] gives the conclusion step a short view so
//! it never replays the whole session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_ANALYSES: usize = 10;
pub const MAX_CONCLUSIONS: usize = 5;
pub const ANALYSIS_CHAR_LIMIT: usize = 1000;
pub const CONCLUSION_CHAR_LIMIT: usize = 500;

pub const SUMMARY_ANALYSES: usize = 3;
pub const SUMMARY_CONCLUSIONS: usize = 1;
const SUMMARY_ANALYSIS_CHARS: usize = 100;
const SUMMARY_CONCLUSION_CHARS: usize = 150;

const TRUNCATION_MARKER: &str = "... [truncated]";
const EMPTY_SUMMARY: &str = "Analysis session started recently.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Analysis,
    Conclusion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub truncated: bool,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn analysis(content: impl Into<String>) -> Self {
        Self::new(MemoryKind::Analysis, content)
    }

    pub fn conclusion(content: impl Into<String>) -> Self {
        Self::new(MemoryKind::Conclusion, content)
    }

    fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            truncated: false,
            timestamp: Utc::now(),
        }
    }
}

/// Caps applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    pub max_analyses: usize,
    pub max_conclusions: usize,
    pub analysis_chars: usize,
    pub conclusion_chars: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_analyses: MAX_ANALYSES,
            max_conclusions: MAX_CONCLUSIONS,
            analysis_chars: ANALYSIS_CHAR_LIMIT,
            conclusion_chars: CONCLUSION_CHAR_LIMIT,
        }
    }
}

/// Serialized shape of one session's memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub session_start: DateTime<Utc>,
    #[serde(default)]
    pub analyses: Vec<MemoryEntry>,
    #[serde(default)]
    pub conclusions: Vec<MemoryEntry>,
    #[serde(default)]
    pub dataset_info: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            session_start: now,
            analyses: Vec::new(),
            conclusions: Vec::new(),
            dataset_info: None,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionMemoryStore {
    limits: MemoryLimits,
    session_start: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    dataset_info: Option<String>,
    analyses: VecDeque<MemoryEntry>,
    conclusions: VecDeque<MemoryEntry>,
}

impl Default for SessionMemoryStore {
    fn default() -> Self {
        Self::new(MemoryLimits::default())
    }
}

impl SessionMemoryStore {
    pub fn new(limits: MemoryLimits) -> Self {
        let now = Utc::now();
        Self {
            limits,
            session_start: now,
            last_updated: now,
            dataset_info: None,
            analyses: VecDeque::new(),
            conclusions: VecDeque::new(),
        }
    }

    /// Rebuilds a store from a persisted record, re-applying the limits.
    pub fn from_record(record: MemoryRecord, limits: MemoryLimits) -> Self {
        let mut store = Self::new(limits);
        store.session_start = record.session_start;
        store.dataset_info = record.dataset_info;
        for entry in record.analyses.into_iter().chain(record.conclusions) {
            store.append(entry);
        }
        store.last_updated = record.last_updated;
        store
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    pub fn set_dataset_info(&mut self, info: impl Into<String>) {
        self.dataset_info = Some(info.into());
        self.last_updated = Utc::now();
    }

    pub fn dataset_info(&self) -> Option<&str> {
        self.dataset_info.as_deref()
    }

    /// Truncates, appends, then evicts from the front until within the cap.
    pub fn append(&mut self, mut entry: MemoryEntry) {
        let (list, cap, char_limit) = match entry.kind {
            MemoryKind::Analysis => (
                &mut self.analyses,
                self.limits.max_analyses,
                self.limits.analysis_chars,
            ),
            MemoryKind::Conclusion => (
                &mut self.conclusions,
                self.limits.max_conclusions,
                self.limits.conclusion_chars,
            ),
        };

        if entry.content.chars().count() > char_limit {
            let mut cut = truncate_chars(&entry.content, char_limit).to_string();
            cut.push_str(TRUNCATION_MARKER);
            entry.content = cut;
            entry.truncated = true;
        }

        list.push_back(entry);
        while list.len() > cap {
            list.pop_front();
        }
        self.last_updated = Utc::now();
    }

    pub fn analyses(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.analyses.iter()
    }

    pub fn conclusions(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.conclusions.iter()
    }

    pub fn analysis_count(&self) -> usize {
        self.analyses.len()
    }

    pub fn conclusion_count(&self) -> usize {
        self.conclusions.len()
    }

    /// The last `n` analyses, oldest first.
    pub fn recent_analyses(&self, n: usize) -> Vec<&MemoryEntry> {
        let skip = self.analyses.len().saturating_sub(n);
        self.analyses.iter().skip(skip).collect()
    }

    /// The last `n` conclusions, oldest first.
    pub fn recent_conclusions(&self, n: usize) -> Vec<&str> {
        let skip = self.conclusions.len().saturating_sub(n);
        self.conclusions
            .iter()
            .skip(skip)
            .map(|entry| entry.content.as_str())
            .collect()
    }

    /// Compact view for the conclusion step.
    pub fn summary(&self, max_analyses: usize, max_conclusions: usize) -> String {
        let mut lines = Vec::new();

        if let Some(info) = &self.dataset_info {
            lines.push(format!("Dataset: {}", info));
        }

        let recent = self.recent_analyses(max_analyses);
        if !recent.is_empty() {
            lines.push("Recent analyses:".to_string());
            for (index, entry) in recent.iter().enumerate() {
                let flat = entry.content.replace('\n', " ");
                lines.push(format!(
                    "  {}. {}",
                    index + 1,
                    shorten(&flat, SUMMARY_ANALYSIS_CHARS)
                ));
            }
        }

        let conclusions = self.recent_conclusions(max_conclusions);
        match conclusions.len() {
            0 => {}
            1 => lines.push(format!(
                "Last conclusion: {}",
                shorten(conclusions[0], SUMMARY_CONCLUSION_CHARS)
            )),
            _ => {
                lines.push("Recent conclusions:".to_string());
                for conclusion in conclusions {
                    lines.push(format!("  - {}", shorten(conclusion, SUMMARY_CONCLUSION_CHARS)));
                }
            }
        }

        if lines.is_empty() {
            EMPTY_SUMMARY.to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Summary with the default 3 analyses and 1 conclusion.
    pub fn default_summary(&self) -> String {
        self.summary(SUMMARY_ANALYSES, SUMMARY_CONCLUSIONS)
    }

    /// Resets to an empty session with a fresh start timestamp.
    pub fn clear(&mut self) {
        let now = Utc::now();
        self.analyses.clear();
        self.conclusions.clear();
        self.dataset_info = None;
        self.session_start = now;
        self.last_updated = now;
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    pub fn record(&self) -> MemoryRecord {
        MemoryRecord {
            session_start: self.session_start,
            analyses: self.analyses.iter().cloned().collect(),
            conclusions: self.conclusions.iter().cloned().collect(),
            dataset_info: self.dataset_info.clone(),
            last_updated: self.last_updated,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    }
}
