//! Two-tier "have we seen this paper" check
//!
//! The markers answer "definitely not seen" cheaply. A marker hit may be a
//! false positive, so hits are confirmed against the queue and processed
//! tables before an id is dropped.

use citecrawl_core::{PaperId, PersistenceError};
use rustc_hash::FxHashSet;

use crate::db::{Database, MAX_BINDS, placeholders};
use crate::markers::MarkerSet;

#[derive(Clone)]
pub struct DedupFilter {
    db: Database,
    queued: MarkerSet,
    processed: MarkerSet,
}

impl DedupFilter {
    pub fn new(db: &Database, queued: MarkerSet, processed: MarkerSet) -> Self {
        Self {
            db: db.clone(),
            queued,
            processed,
        }
    }

    /// The ids (first occurrence, input order) that are neither queued nor
    /// processed.
    pub fn filter_new(&self, ids: &[PaperId]) -> Result<Vec<PaperId>, PersistenceError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(ids);
        }
        let queued = self.queued.contains_many(&ids)?;
        let processed = self.processed.contains_many(&ids)?;

        let suspects: Vec<PaperId> = ids
            .iter()
            .zip(queued.iter().zip(&processed))
            .filter(|(_, (q, p))| **q || **p)
            .map(|(id, _)| id.clone())
            .collect();
        let confirmed = self.known_ids(
            &suspects,
            "SELECT paper_id FROM processed_papers WHERE paper_id IN ({p})
             UNION SELECT paper_id FROM task_queue WHERE paper_id IN ({p})",
        )?;

        let false_positives = suspects.len() - confirmed.len();
        if false_positives > 0 {
            log::debug!("{false_positives} marker false positives treated as new");
        }
        Ok(ids.into_iter().filter(|id| !confirmed.contains(id)).collect())
    }

    /// The ids not yet recorded as processed. Used on popped tasks, which
    /// are queued by definition.
    pub fn filter_unprocessed(&self, ids: &[PaperId]) -> Result<Vec<PaperId>, PersistenceError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(ids);
        }
        let hits = self.processed.contains_many(&ids)?;
        let suspects: Vec<PaperId> = ids
            .iter()
            .zip(&hits)
            .filter(|(_, hit)| **hit)
            .map(|(id, _)| id.clone())
            .collect();
        let confirmed = self.known_ids(
            &suspects,
            "SELECT paper_id FROM processed_papers WHERE paper_id IN ({p})",
        )?;
        Ok(ids.into_iter().filter(|id| !confirmed.contains(id)).collect())
    }

    /// Run `template` (with every `{p}` replaced by a placeholder list) over
    /// `ids` in chunks and collect the returned paper ids.
    fn known_ids(
        &self,
        ids: &[PaperId],
        template: &'static str,
    ) -> Result<FxHashSet<PaperId>, PersistenceError> {
        if ids.is_empty() {
            return Ok(FxHashSet::default());
        }
        let repeats = template.matches("{p}").count().max(1);
        let pool = self.db.pool();
        self.db.with_retry("confirm seen ids", || async move {
            let mut found = FxHashSet::default();
            for chunk in ids.chunks(MAX_BINDS / repeats) {
                let sql = template.replace("{p}", &placeholders(chunk.len()));
                let mut query = sqlx::query_scalar::<_, String>(&sql);
                for _ in 0..repeats {
                    for id in chunk {
                        query = query.bind(id.as_str());
                    }
                }
                found.extend(query.fetch_all(pool).await?.into_iter().map(PaperId::from));
            }
            Ok(found)
        })
    }
}

fn distinct(ids: &[PaperId]) -> Vec<PaperId> {
    let mut seen = FxHashSet::default();
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}
