//! Paginated reference listing
//!
//! `GET /paper/{id}/references` returns at most `limit` entries per call plus a
//! `next` offset. [`References`] walks those pages lazily and never yields the
//! same id twice for one paper, even when pages overlap.

use std::collections::VecDeque;
use std::sync::Arc;

use citecrawl_core::{PaperId, UpstreamError};
use rustc_hash::FxHashSet;

use crate::requester::Requester;
use crate::schema::ReferencePage;
use crate::transport::ApiRequest;

pub const DEFAULT_PAGE_SIZE: usize = 1000;
/// Upstream rejects offsets past this, so it doubles as the fan-out cap.
pub const DEFAULT_MAX_REFERENCES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub page_size: usize,
    pub max_references: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_references: DEFAULT_MAX_REFERENCES,
        }
    }
}

pub struct ReferenceFetcher {
    requester: Arc<Requester>,
    limits: FetchLimits,
}

impl ReferenceFetcher {
    pub fn new(requester: Arc<Requester>, limits: FetchLimits) -> Self {
        Self { requester, limits }
    }

    pub fn limits(&self) -> FetchLimits {
        self.limits
    }

    /// All references of `paper_id`, starting from the first page.
    pub fn references(&self, paper_id: &PaperId) -> References<'_> {
        self.references_from(paper_id, 0, std::iter::empty())
    }

    /// Continue a listing at `offset`. `known` ids were already obtained some
    /// other way (e.g. embedded in batch metadata) and are not yielded again.
    pub fn references_from(
        &self,
        paper_id: &PaperId,
        offset: usize,
        known: impl IntoIterator<Item = PaperId>,
    ) -> References<'_> {
        let seen: FxHashSet<PaperId> = known.into_iter().collect();
        References {
            requester: &self.requester,
            paper_id: paper_id.clone(),
            limits: self.limits,
            offset,
            buffer: VecDeque::new(),
            seen,
            pages: 0,
            done: offset >= self.limits.max_references,
        }
    }
}

/// Lazy reference sequence for one paper.
///
/// A page that fails after the requester's retries yields one `Err` and ends
/// the sequence. Ids from earlier pages have already been yielded; re-issuing
/// the fetch starts a fresh listing.
pub struct References<'a> {
    requester: &'a Requester,
    paper_id: PaperId,
    limits: FetchLimits,
    offset: usize,
    buffer: VecDeque<PaperId>,
    seen: FxHashSet<PaperId>,
    pages: usize,
    done: bool,
}

impl References<'_> {
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Drain the sequence, failing on the first page error.
    pub fn try_collect(self) -> Result<Vec<PaperId>, UpstreamError> {
        self.collect()
    }

    fn fetch_page(&mut self) -> Result<(), UpstreamError> {
        let limit = self
            .limits
            .page_size
            .max(1)
            .min(self.limits.max_references - self.offset);
        let segment = urlencoding::encode(self.paper_id.as_str());
        let request = ApiRequest::get(format!("paper/{segment}/references"))
            .query("fields", "paperId")
            .query("offset", self.offset)
            .query("limit", limit);
        let page: ReferencePage = self.requester.send_json(&request)?;
        self.pages += 1;

        let received = page.data.len();
        let before = self.buffer.len();
        for entry in &page.data {
            if let Some(id) = entry.paper_id() {
                let id = PaperId::from(id);
                if self.seen.insert(id.clone()) {
                    self.buffer.push_back(id);
                }
            }
        }
        log::debug!(
            "{}: page at offset {} gave {} entries, {} new",
            self.paper_id,
            self.offset,
            received,
            self.buffer.len() - before
        );

        match page.next {
            Some(next) if next > self.offset && next < self.limits.max_references && received > 0 => {
                self.offset = next;
            }
            Some(next) if next >= self.limits.max_references => {
                log::debug!(
                    "{}: reference list truncated at {}",
                    self.paper_id,
                    self.limits.max_references
                );
                self.done = true;
            }
            _ => self.done = true,
        }
        Ok(())
    }
}

impl Iterator for References<'_> {
    type Item = Result<PaperId, UpstreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Some(Ok(id));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
