//! Graph API response shapes (only the fields the crawler reads)

use serde::Deserialize;

/// One page of `GET /paper/{id}/references`.
#[derive(Debug, Deserialize)]
pub struct ReferencePage {
    #[serde(default)]
    pub offset: Option<usize>,
    /// Offset of the following page; absent on the last page.
    #[serde(default)]
    pub next: Option<usize>,
    #[serde(default)]
    pub data: Vec<ReferenceEntry>,
}

/// `{"citedPaper": {"paperId": ...}}`. A flat `{"paperId": ...}` is also
/// accepted.
#[derive(Debug, Deserialize)]
pub struct ReferenceEntry {
    #[serde(rename = "citedPaper", default)]
    pub cited_paper: Option<PaperRef>,
    #[serde(rename = "paperId", default)]
    pub paper_id: Option<String>,
}

impl ReferenceEntry {
    pub fn paper_id(&self) -> Option<&str> {
        self.cited_paper
            .as_ref()
            .and_then(|p| p.paper_id.as_deref())
            .or(self.paper_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct PaperRef {
    #[serde(rename = "paperId", default)]
    pub paper_id: Option<String>,
}

/// One element of the `POST /paper/batch` response array.
#[derive(Debug, Deserialize)]
pub struct BatchRecord {
    #[serde(rename = "paperId", default)]
    pub paper_id: Option<String>,
    #[serde(rename = "referenceCount", default)]
    pub reference_count: Option<u64>,
    #[serde(rename = "fieldsOfStudy", default)]
    pub fields_of_study: Option<Vec<String>>,
    #[serde(default)]
    pub references: Option<Vec<PaperRef>>,
}
