//! Batched paper metadata (`POST /paper/batch`)

use citecrawl_core::{PaperId, UpstreamError};
use rustc_hash::FxHashSet;
use serde_json::json;

use crate::requester::Requester;
use crate::schema::BatchRecord;
use crate::transport::ApiRequest;

pub const BATCH_FIELDS: &str = "paperId,referenceCount,fieldsOfStudy,references.paperId";
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What the crawler needs to know about one paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperMetadata {
    /// Canonical Semantic Scholar id, as upstream reports it.
    pub paper_id: PaperId,
    /// Id the paper was looked up by. Differs from `paper_id` when that was
    /// an external alias such as `DOI:` or `ARXIV:`.
    pub requested: PaperId,
    /// Total reference count upstream, which may exceed the embedded list.
    pub reference_count: usize,
    pub fields_of_study: Vec<String>,
    /// Embedded references, deduplicated in first-seen order.
    pub references: Vec<PaperId>,
    /// Raw length of the embedded list, null entries included. Paging
    /// continues from here.
    pub embedded_len: usize,
}

impl PaperMetadata {
    fn from_record(requested: &PaperId, record: BatchRecord) -> Self {
        let mut seen = FxHashSet::default();
        let embedded = record.references.unwrap_or_default();
        let embedded_len = embedded.len();
        let references: Vec<PaperId> = embedded
            .into_iter()
            .filter_map(|r| r.paper_id)
            .filter(|id| !id.is_empty())
            .map(PaperId::from)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let reference_count = record
            .reference_count
            .map_or(embedded_len, |n| n as usize);
        let paper_id = record
            .paper_id
            .filter(|id| !id.is_empty())
            .map_or_else(|| requested.clone(), PaperId::from);
        Self {
            paper_id,
            requested: requested.clone(),
            reference_count,
            fields_of_study: record.fields_of_study.unwrap_or_default(),
            references,
            embedded_len,
        }
    }

    pub fn is_alias(&self) -> bool {
        self.paper_id != self.requested
    }

    /// The embedded list is a prefix; the rest must be paged in.
    pub fn has_overflow(&self) -> bool {
        self.reference_count > self.embedded_len
    }
}

/// Fetch metadata for `ids` in one call.
///
/// The result is positional: `None` where upstream does not know the id.
pub fn fetch_batch(
    requester: &Requester,
    ids: &[PaperId],
) -> Result<Vec<Option<PaperMetadata>>, UpstreamError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let request = ApiRequest::post("paper/batch", json!({ "ids": ids }))
        .query("fields", BATCH_FIELDS);
    let records: Vec<Option<BatchRecord>> = requester.send_json(&request)?;
    if records.len() != ids.len() {
        return Err(UpstreamError::malformed(format!(
            "{request}: asked for {} papers, got {}",
            ids.len(),
            records.len()
        )));
    }
    Ok(ids
        .iter()
        .zip(records)
        .map(|(id, rec)| rec.map(|r| PaperMetadata::from_record(id, r)))
        .collect())
}
