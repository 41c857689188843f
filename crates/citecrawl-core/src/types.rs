//! Citation graph records shared by the fetcher, the store and the crawler

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque Semantic Scholar paper identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(String);

impl PaperId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaperId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PaperId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for PaperId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Directed edge: `citing` references `cited`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CitationEdge {
    pub citing: PaperId,
    pub cited: PaperId,
}

impl CitationEdge {
    pub fn new(citing: impl Into<PaperId>, cited: impl Into<PaperId>) -> Self {
        Self {
            citing: citing.into(),
            cited: cited.into(),
        }
    }
}

impl fmt::Display for CitationEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.citing, self.cited)
    }
}

/// A paper whose crawl completed. Written once, never updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedPaper {
    pub paper_id: PaperId,
    pub fields_of_study: BTreeSet<String>,
}

impl ProcessedPaper {
    pub fn new(paper_id: impl Into<PaperId>, fields: impl IntoIterator<Item = String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            fields_of_study: fields.into_iter().collect(),
        }
    }
}

/// Queue payload: the paper to crawl plus where it was discovered.
///
/// Serialized as JSON in the queue. The `id` key matches payloads written by
/// older crawl sessions, which carried nothing else.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "id")]
    pub paper_id: PaperId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<PaperId>,
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Seed task with no parent.
    pub fn seed(paper_id: impl Into<PaperId>) -> Self {
        Self {
            paper_id: paper_id.into(),
            discovered_from: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Task discovered through `parent`'s reference list.
    pub fn discovered(paper_id: impl Into<PaperId>, parent: &PaperId) -> Self {
        Self {
            paper_id: paper_id.into(),
            discovered_from: Some(parent.clone()),
            enqueued_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
