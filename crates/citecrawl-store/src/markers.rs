//! Durable probabilistic membership sets
//!
//! Each marker is a Bloom filter whose bit array lives in `membership_words`
//! as 64-bit words. Setting bits is an `OR` upsert, so concurrent writers
//! never clear each other's bits and the set only grows until a fresh start.

use citecrawl_core::{BloomParams, PaperId, PersistenceError};
use rustc_hash::{FxHashMap, FxHashSet};
use sqlx::Row;

use crate::db::{Database, MAX_BINDS, placeholders};

pub const QUEUED_MARKER: &str = "queued";
pub const PROCESSED_MARKER: &str = "processed";

#[derive(Clone)]
pub struct MarkerSet {
    db: Database,
    name: String,
    params: BloomParams,
}

impl MarkerSet {
    /// Attach to marker `name`, reserving `requested` geometry on first use.
    /// An existing marker keeps the geometry it was created with.
    pub fn open(db: &Database, name: &str, requested: BloomParams) -> Result<Self, PersistenceError> {
        let pool = db.pool();
        let (num_bits, num_hashes): (i64, i64) = db.with_retry("reserve marker", || async move {
            sqlx::query(
                "INSERT OR IGNORE INTO membership_filters (name, num_bits, num_hashes) VALUES (?, ?, ?)",
            )
            .bind(name)
            .bind(requested.num_bits as i64)
            .bind(i64::from(requested.num_hashes))
            .execute(pool)
            .await?;
            sqlx::query_as("SELECT num_bits, num_hashes FROM membership_filters WHERE name = ?")
                .bind(name)
                .fetch_one(pool)
                .await
        })?;

        let params = BloomParams {
            num_bits: num_bits as u64,
            num_hashes: num_hashes as u32,
        };
        if params.num_bits == 0 || params.num_hashes == 0 {
            return Err(PersistenceError::Schema(format!(
                "marker '{name}' has empty geometry"
            )));
        }
        if params != requested {
            log::info!(
                "Marker '{name}' keeps reserved geometry ({} bits, {} hashes)",
                params.num_bits,
                params.num_hashes
            );
        }
        Ok(Self {
            db: db.clone(),
            name: name.to_string(),
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> BloomParams {
        self.params
    }

    /// Probable membership of each id, positionally. `false` is certain.
    pub fn contains_many(&self, ids: &[PaperId]) -> Result<Vec<bool>, PersistenceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let needed: Vec<i64> = ids
            .iter()
            .flat_map(|id| self.params.words(id.as_str()))
            .map(|(word, _)| word as i64)
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();

        let stored = self.load_words(&needed)?;
        Ok(ids
            .iter()
            .map(|id| {
                self.params.words(id.as_str()).all(|(word, mask)| {
                    stored.get(&(word as i64)).is_some_and(|bits| bits & mask == mask)
                })
            })
            .collect())
    }

    pub fn contains(&self, id: &PaperId) -> Result<bool, PersistenceError> {
        Ok(self
            .contains_many(std::slice::from_ref(id))?
            .first()
            .copied()
            .unwrap_or(false))
    }

    /// Set the bits of every id in one transaction.
    pub fn insert_many(&self, ids: &[PaperId]) -> Result<(), PersistenceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut masks: FxHashMap<i64, u64> = FxHashMap::default();
        for id in ids {
            for (word, mask) in self.params.words(id.as_str()) {
                *masks.entry(word as i64).or_default() |= mask;
            }
        }
        let mut masks: Vec<(i64, i64)> = masks.into_iter().map(|(w, m)| (w, m as i64)).collect();
        // Fixed order keeps concurrent writers from interleaving lock order
        masks.sort_unstable();

        let pool = self.db.pool();
        let name = self.name.as_str();
        let masks = &masks;
        self.db.with_retry("set marker bits", || async move {
            let mut tx = pool.begin().await?;
            for chunk in masks.chunks(MAX_BINDS / 3) {
                let values = vec!["(?, ?, ?)"; chunk.len()].join(", ");
                let sql = format!(
                    "INSERT INTO membership_words (name, word, bits) VALUES {values}
                     ON CONFLICT(name, word) DO UPDATE SET bits = bits | excluded.bits"
                );
                let mut query = sqlx::query(&sql);
                for (word, bits) in chunk {
                    query = query.bind(name).bind(*word).bind(*bits);
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await
        })
    }

    fn load_words(&self, words: &[i64]) -> Result<FxHashMap<i64, u64>, PersistenceError> {
        let pool = self.db.pool();
        let name = self.name.as_str();
        self.db.with_retry("read marker bits", || async move {
            let mut out = FxHashMap::default();
            for chunk in words.chunks(MAX_BINDS - 1) {
                let sql = format!(
                    "SELECT word, bits FROM membership_words WHERE name = ? AND word IN ({})",
                    placeholders(chunk.len())
                );
                let mut query = sqlx::query(&sql).bind(name);
                for word in chunk {
                    query = query.bind(*word);
                }
                for row in query.fetch_all(pool).await? {
                    let word: i64 = row.try_get("word")?;
                    let bits: i64 = row.try_get("bits")?;
                    out.insert(word, bits as u64);
                }
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::TestDb;

    fn ids(n: usize, prefix: &str) -> Vec<PaperId> {
        (0..n).map(|i| PaperId::new(format!("{prefix}{i}"))).collect()
    }

    #[test]
    fn inserted_ids_are_members() {
        let t = TestDb::new();
        let m = MarkerSet::open(&t.db, "queued", BloomParams::for_capacity(10_000, 1e-4)).unwrap();
        let added = ids(200, "p");
        m.insert_many(&added).unwrap();
        assert!(m.contains_many(&added).unwrap().iter().all(|&b| b));

        let others = ids(200, "q");
        let hits = m.contains_many(&others).unwrap().iter().filter(|&&b| b).count();
        assert!(hits < 5, "{hits} false positives");
    }

    #[test]
    fn markers_are_independent() {
        let t = TestDb::new();
        let params = BloomParams::for_capacity(1000, 1e-3);
        let queued = MarkerSet::open(&t.db, QUEUED_MARKER, params).unwrap();
        let processed = MarkerSet::open(&t.db, PROCESSED_MARKER, params).unwrap();
        let id = PaperId::new("A");
        queued.insert_many(std::slice::from_ref(&id)).unwrap();
        assert!(queued.contains(&id).unwrap());
        assert!(!processed.contains(&id).unwrap());
    }

    #[test]
    fn geometry_is_reserved_once() {
        let t = TestDb::new();
        let first = BloomParams::for_capacity(1000, 1e-3);
        let m = MarkerSet::open(&t.db, "processed", first).unwrap();
        m.insert_many(&[PaperId::new("A")]).unwrap();

        let reopened =
            MarkerSet::open(&t.db, "processed", BloomParams::for_capacity(5000, 1e-6)).unwrap();
        assert_eq!(reopened.params(), first);
        assert!(reopened.contains(&PaperId::new("A")).unwrap());
    }

    #[test]
    fn bits_survive_concurrent_writers() {
        let t = TestDb::new();
        let m = MarkerSet::open(&t.db, "queued", BloomParams::for_capacity(100, 0.01)).unwrap();
        // Tiny filter: writers share words and must OR, not overwrite
        let batches: Vec<Vec<PaperId>> = (0..4).map(|w| ids(25, &format!("w{w}-"))).collect();
        std::thread::scope(|s| {
            for batch in &batches {
                let m = m.clone();
                s.spawn(move || m.insert_many(batch).unwrap());
            }
        });
        for batch in &batches {
            assert!(m.contains_many(batch).unwrap().iter().all(|&b| b));
        }
    }

    #[test]
    fn reset_clears_bits() {
        let t = TestDb::new();
        let m = MarkerSet::open(&t.db, "queued", BloomParams::for_capacity(1000, 1e-3)).unwrap();
        m.insert_many(&[PaperId::new("A")]).unwrap();
        t.db.reset_crawl_state().unwrap();
        assert!(!m.contains(&PaperId::new("A")).unwrap());
    }
}
