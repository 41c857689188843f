//! Processed papers and citation edges

use std::collections::BTreeSet;

use citecrawl_core::{CitationEdge, PaperId, PersistenceError, ProcessedPaper};

use crate::db::{Database, MAX_BINDS, now_millis};
use crate::markers::MarkerSet;

#[derive(Clone)]
pub struct CitationStore {
    db: Database,
    processed: MarkerSet,
}

impl CitationStore {
    pub fn new(db: &Database, processed: MarkerSet) -> Self {
        Self {
            db: db.clone(),
            processed,
        }
    }

    /// Insert edges, ignoring pairs that already exist. Returns how many
    /// were new. Safe to call concurrently with overlapping edges.
    pub fn insert_edges(&self, edges: &[CitationEdge]) -> Result<u64, PersistenceError> {
        if edges.is_empty() {
            return Ok(0);
        }
        let mut rows: Vec<(&str, &str)> = edges
            .iter()
            .map(|e| (e.citing.as_str(), e.cited.as_str()))
            .collect();
        // Same key order in every writer
        rows.sort_unstable();
        rows.dedup();

        let pool = self.db.pool();
        let rows = &rows;
        let inserted = self.db.with_retry("insert edges", || async move {
            let mut tx = pool.begin().await?;
            let mut inserted = 0u64;
            for chunk in rows.chunks(MAX_BINDS / 2) {
                let values = vec!["(?, ?)"; chunk.len()].join(", ");
                let sql = format!("INSERT OR IGNORE INTO citations (citing_id, cited_id) VALUES {values}");
                let mut query = sqlx::query(&sql);
                for (citing, cited) in chunk {
                    query = query.bind(*citing).bind(*cited);
                }
                inserted += query.execute(&mut *tx).await?.rows_affected();
            }
            if inserted > 0 {
                let now = now_millis();
                sqlx::query(
                    "UPDATE crawl_counters
                     SET citation_edges = citation_edges + ?, last_edge_at = ?,
                         started_at = COALESCE(started_at, ?)
                     WHERE id = 1",
                )
                .bind(inserted as i64)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(inserted)
        })?;
        log::debug!("Stored {inserted} new of {} edges", rows.len());
        Ok(inserted)
    }

    /// Record `paper` as processed: the row (and counter) commit first, then
    /// the processed marker is set. Returns `false` if it was already
    /// recorded; the existing row is left untouched.
    pub fn mark_processed(&self, paper: &ProcessedPaper) -> Result<bool, PersistenceError> {
        let fields = serde_json::to_string(&paper.fields_of_study)
            .map_err(|e| PersistenceError::Schema(e.to_string()))?;
        let pool = self.db.pool();
        let id = paper.paper_id.as_str();
        let fields = fields.as_str();
        let created = self.db.with_retry("mark processed", || async move {
            let now = now_millis();
            let mut tx = pool.begin().await?;
            let created = sqlx::query(
                "INSERT INTO processed_papers (paper_id, fields_of_study, processed_at)
                 VALUES (?, ?, ?) ON CONFLICT(paper_id) DO NOTHING",
            )
            .bind(id)
            .bind(fields)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;
            if created {
                sqlx::query(
                    "UPDATE crawl_counters
                     SET processed_papers = processed_papers + 1, last_processed_at = ?,
                         started_at = COALESCE(started_at, ?)
                     WHERE id = 1",
                )
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(created)
        })?;

        self.processed.insert_many(std::slice::from_ref(&paper.paper_id))?;
        Ok(created)
    }

    pub fn is_processed(&self, id: &PaperId) -> Result<bool, PersistenceError> {
        let pool = self.db.pool();
        let id = id.as_str();
        let n: i64 = self.db.with_retry("processed lookup", || async move {
            sqlx::query_scalar("SELECT COUNT(*) FROM processed_papers WHERE paper_id = ?")
                .bind(id)
                .fetch_one(pool)
                .await
        })?;
        Ok(n > 0)
    }

    /// Every edge, sorted.
    pub fn edges(&self) -> Result<Vec<CitationEdge>, PersistenceError> {
        let pool = self.db.pool();
        let rows: Vec<(String, String)> = self.db.with_retry("list edges", || async move {
            sqlx::query_as("SELECT citing_id, cited_id FROM citations ORDER BY citing_id, cited_id")
                .fetch_all(pool)
                .await
        })?;
        Ok(rows
            .into_iter()
            .map(|(citing, cited)| CitationEdge::new(citing, cited))
            .collect())
    }

    /// Every processed paper, sorted by id.
    pub fn processed_papers(&self) -> Result<Vec<ProcessedPaper>, PersistenceError> {
        let pool = self.db.pool();
        let rows: Vec<(String, String)> = self.db.with_retry("list processed", || async move {
            sqlx::query_as("SELECT paper_id, fields_of_study FROM processed_papers ORDER BY paper_id")
                .fetch_all(pool)
                .await
        })?;
        rows.into_iter()
            .map(|(id, fields)| {
                let fields: BTreeSet<String> = serde_json::from_str(&fields)
                    .map_err(|e| PersistenceError::Schema(format!("fields_of_study of {id}: {e}")))?;
                Ok(ProcessedPaper {
                    paper_id: PaperId::from(id),
                    fields_of_study: fields,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CrawlCounters;
    use crate::db::testing::TestDb;
    use crate::markers::PROCESSED_MARKER;
    use citecrawl_core::BloomParams;

    fn store(t: &TestDb) -> CitationStore {
        let marker =
            MarkerSet::open(&t.db, PROCESSED_MARKER, BloomParams::for_capacity(10_000, 1e-5)).unwrap();
        CitationStore::new(&t.db, marker)
    }

    #[test]
    fn duplicate_edges_are_noops() {
        let t = TestDb::new();
        let s = store(&t);
        let edges = vec![CitationEdge::new("A", "B"), CitationEdge::new("A", "C")];
        assert_eq!(s.insert_edges(&edges).unwrap(), 2);
        assert_eq!(s.insert_edges(&edges).unwrap(), 0);
        assert_eq!(
            s.insert_edges(&[CitationEdge::new("A", "B"), CitationEdge::new("A", "B")])
                .unwrap(),
            0
        );
        assert_eq!(s.edges().unwrap(), edges);
        assert_eq!(CrawlCounters::load(&t.db).unwrap().citation_edges, 2);
    }

    #[test]
    fn concurrent_overlapping_writers_store_each_pair_once() {
        let t = TestDb::new();
        let s = store(&t);
        // 8 workers, each inserting a window of 300 edges overlapping its neighbours
        std::thread::scope(|scope| {
            for w in 0..8usize {
                let s = s.clone();
                scope.spawn(move || {
                    let edges: Vec<CitationEdge> = (w * 100..w * 100 + 300)
                        .map(|i| CitationEdge::new(format!("p{}", i % 50), format!("r{i}")))
                        .collect();
                    for chunk in edges.chunks(40) {
                        s.insert_edges(chunk).unwrap();
                    }
                });
            }
        });

        let stored = s.edges().unwrap();
        let distinct: BTreeSet<_> = stored.iter().collect();
        assert_eq!(stored.len(), distinct.len());
        // Windows cover r0..r999
        assert_eq!(stored.len(), 1000);
        assert_eq!(CrawlCounters::load(&t.db).unwrap().citation_edges, 1000);
    }

    #[test]
    fn mark_processed_is_write_once() {
        let t = TestDb::new();
        let s = store(&t);
        let paper = ProcessedPaper::new("A", vec!["Biology".to_string(), "Medicine".to_string()]);
        assert!(s.mark_processed(&paper).unwrap());
        assert!(!s
            .mark_processed(&ProcessedPaper::new("A", vec!["Art".to_string()]))
            .unwrap());

        assert!(s.is_processed(&PaperId::new("A")).unwrap());
        assert!(s.processed.contains(&PaperId::new("A")).unwrap());
        assert_eq!(s.processed_papers().unwrap(), vec![paper]);
        assert_eq!(CrawlCounters::load(&t.db).unwrap().processed_papers, 1);
    }

    #[test]
    fn concurrent_mark_processed_counts_once() {
        let t = TestDb::new();
        let s = store(&t);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let s = s.clone();
                scope.spawn(move || {
                    for i in 0..20 {
                        s.mark_processed(&ProcessedPaper::new(format!("p{i}"), Vec::new()))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(s.processed_papers().unwrap().len(), 20);
        assert_eq!(CrawlCounters::load(&t.db).unwrap().processed_papers, 20);
    }
}
