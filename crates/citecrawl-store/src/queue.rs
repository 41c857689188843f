//! Durable FIFO task queue with lease-based delivery
//!
//! `pop` leases an entry: it stays in the table but is invisible until
//! `visible_at`. The worker `ack`s it when done or `release`s it to retry
//! later. A worker that dies holding a lease simply lets it expire, after
//! which the entry is delivered again. Lease tokens make a late `ack` from a
//! worker whose lease already expired a no-op.

use std::time::Duration;

use citecrawl_core::{PaperId, QueueError, TaskRecord};
use rustc_hash::FxHashSet;
use sqlx::Row;

use crate::db::{Database, MAX_BINDS, now_millis, placeholders};
use crate::markers::MarkerSet;

pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(600);

/// A popped task, owned by one worker until acked, released or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub seq: i64,
    pub token: i64,
    pub task: TaskRecord,
    /// Deliveries so far, this one included.
    pub attempts: u32,
}

impl Lease {
    pub fn paper_id(&self) -> &PaperId {
        &self.task.paper_id
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    queued: MarkerSet,
    lease_timeout: Duration,
}

impl TaskQueue {
    pub fn new(db: &Database, queued: MarkerSet, lease_timeout: Duration) -> Self {
        Self {
            db: db.clone(),
            queued,
            lease_timeout,
        }
    }

    /// Enqueue tasks in order, skipping papers that are already queued or
    /// already processed. Returns the ids actually added.
    ///
    /// The queued marker is set only after the insert commits.
    pub fn push(&self, tasks: &[TaskRecord]) -> Result<Vec<PaperId>, QueueError> {
        let mut seen = FxHashSet::default();
        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            if !seen.insert(&task.paper_id) {
                continue;
            }
            let payload = task
                .to_json()
                .map_err(|e| QueueError::Payload(format!("{}: {e}", task.paper_id)))?;
            rows.push((task.paper_id.as_str(), payload));
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.db.pool();
        let rows = &rows;
        let added: Vec<PaperId> = self.db.with_retry("queue push", || async move {
            let now = now_millis();
            let mut tx = pool.begin().await?;
            let mut added = Vec::new();
            for (id, payload) in rows {
                let result = sqlx::query(
                    "INSERT INTO task_queue (paper_id, payload, visible_at, attempts)
                     SELECT ?, ?, ?, 0
                     WHERE NOT EXISTS (SELECT 1 FROM processed_papers WHERE paper_id = ?)
                     ON CONFLICT(paper_id) DO NOTHING",
                )
                .bind(*id)
                .bind(payload.as_str())
                .bind(now)
                .bind(*id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 1 {
                    added.push(PaperId::from(*id));
                }
            }
            tx.commit().await?;
            Ok(added)
        })?;

        let pushed: Vec<PaperId> = rows.iter().map(|(id, _)| PaperId::from(*id)).collect();
        self.queued.insert_many(&pushed)?;
        log::debug!("Queued {} of {} tasks", added.len(), pushed.len());
        Ok(added)
    }

    /// Lease up to `max` visible entries, oldest first.
    pub fn pop_batch(&self, max: usize) -> Result<Vec<Lease>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let pool = self.db.pool();
        let lease_ms = self.lease_ms();
        let token: i64 = rand::random();
        let rows = self.db.with_retry("queue pop", || async move {
            let now = now_millis();
            sqlx::query(
                "UPDATE task_queue
                 SET visible_at = ?, lease = ?, attempts = attempts + 1
                 WHERE seq IN (
                     SELECT seq FROM task_queue WHERE visible_at <= ? ORDER BY seq LIMIT ?
                 )
                 RETURNING seq, paper_id, payload, attempts",
            )
            .bind(now.saturating_add(lease_ms))
            .bind(token)
            .bind(now)
            .bind(max as i64)
            .fetch_all(pool)
            .await
        })?;

        let mut leases = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.try_get("seq").map_err(payload_err)?;
            let paper_id: String = row.try_get("paper_id").map_err(payload_err)?;
            let payload: String = row.try_get("payload").map_err(payload_err)?;
            let attempts: i64 = row.try_get("attempts").map_err(payload_err)?;
            let task = match TaskRecord::from_json(&payload) {
                Ok(task) if task.paper_id.as_str() == paper_id => task,
                Ok(_) | Err(_) => {
                    log::warn!("Unreadable queue payload for {paper_id}, using bare id");
                    TaskRecord::seed(paper_id)
                }
            };
            leases.push(Lease {
                seq,
                token,
                task,
                attempts: attempts.max(0) as u32,
            });
        }
        // RETURNING order is unspecified
        leases.sort_by_key(|l| l.seq);
        Ok(leases)
    }

    pub fn pop(&self) -> Result<Option<Lease>, QueueError> {
        Ok(self.pop_batch(1)?.into_iter().next())
    }

    /// Push the deadline of each lease still held to a full lease timeout
    /// from now. Returns the `seq`s renewed; a missing one has been acked or
    /// re-leased by another worker since it expired.
    pub fn extend(&self, leases: &[Lease]) -> Result<FxHashSet<i64>, QueueError> {
        if leases.is_empty() {
            return Ok(FxHashSet::default());
        }
        let pool = self.db.pool();
        let lease_ms = self.lease_ms();
        let held = self.db.with_retry("queue extend", || async move {
            let deadline = now_millis().saturating_add(lease_ms);
            let mut tx = pool.begin().await?;
            let mut held = FxHashSet::default();
            for lease in leases {
                let result =
                    sqlx::query("UPDATE task_queue SET visible_at = ? WHERE seq = ? AND lease = ?")
                        .bind(deadline)
                        .bind(lease.seq)
                        .bind(lease.token)
                        .execute(&mut *tx)
                        .await?;
                if result.rows_affected() == 1 {
                    held.insert(lease.seq);
                }
            }
            tx.commit().await?;
            Ok(held)
        })?;
        Ok(held)
    }

    /// Remove a finished entry. `false` if the lease had expired and the
    /// entry now belongs to someone else (or is gone).
    pub fn ack(&self, lease: &Lease) -> Result<bool, QueueError> {
        let pool = self.db.pool();
        let (seq, token) = (lease.seq, lease.token);
        let result = self.db.with_retry("queue ack", || async move {
            sqlx::query("DELETE FROM task_queue WHERE seq = ? AND lease = ?")
                .bind(seq)
                .bind(token)
                .execute(pool)
                .await
        })?;
        let acked = result.rows_affected() == 1;
        if !acked {
            log::debug!("Lease on {} expired before ack", lease.paper_id());
        }
        Ok(acked)
    }

    /// Give a leased entry back; it becomes visible again after `delay`.
    pub fn release(&self, lease: &Lease, delay: Duration) -> Result<bool, QueueError> {
        let pool = self.db.pool();
        let (seq, token) = (lease.seq, lease.token);
        let delay_ms = delay.as_millis().min(i64::MAX as u128) as i64;
        let result = self.db.with_retry("queue release", || async move {
            sqlx::query(
                "UPDATE task_queue SET visible_at = ?, lease = NULL WHERE seq = ? AND lease = ?",
            )
            .bind(now_millis().saturating_add(delay_ms))
            .bind(seq)
            .bind(token)
            .execute(pool)
            .await
        })?;
        Ok(result.rows_affected() == 1)
    }

    /// Hand back a lease that was never worked on (shutdown). The delivery
    /// does not count against the paper's attempts.
    pub fn requeue_unstarted(&self, lease: &Lease) -> Result<bool, QueueError> {
        let pool = self.db.pool();
        let (seq, token) = (lease.seq, lease.token);
        let result = self.db.with_retry("queue requeue", || async move {
            sqlx::query(
                "UPDATE task_queue
                 SET visible_at = ?, lease = NULL, attempts = MAX(attempts - 1, 0)
                 WHERE seq = ? AND lease = ?",
            )
            .bind(now_millis())
            .bind(seq)
            .bind(token)
            .execute(pool)
            .await
        })?;
        Ok(result.rows_affected() == 1)
    }

    /// All entries, leased or not.
    pub fn len(&self) -> Result<u64, QueueError> {
        self.count("SELECT COUNT(*) FROM task_queue", None)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Entries a `pop` could return right now.
    pub fn visible_len(&self) -> Result<u64, QueueError> {
        self.count(
            "SELECT COUNT(*) FROM task_queue WHERE visible_at <= ?",
            Some(now_millis()),
        )
    }

    /// Entries under an unexpired lease.
    pub fn in_flight(&self) -> Result<u64, QueueError> {
        self.count(
            "SELECT COUNT(*) FROM task_queue WHERE lease IS NOT NULL AND visible_at > ?",
            Some(now_millis()),
        )
    }

    /// Which of `ids` currently have an entry.
    pub fn contains_any(&self, ids: &[PaperId]) -> Result<FxHashSet<PaperId>, QueueError> {
        let pool = self.db.pool();
        let found = self.db.with_retry("queue lookup", || async move {
            let mut found = FxHashSet::default();
            for chunk in ids.chunks(MAX_BINDS) {
                let sql = format!(
                    "SELECT paper_id FROM task_queue WHERE paper_id IN ({})",
                    placeholders(chunk.len())
                );
                let mut query = sqlx::query_scalar::<_, String>(&sql);
                for id in chunk {
                    query = query.bind(id.as_str());
                }
                found.extend(query.fetch_all(pool).await?.into_iter().map(PaperId::from));
            }
            Ok(found)
        })?;
        Ok(found)
    }

    /// Queued paper ids in delivery order.
    pub fn pending_ids(&self) -> Result<Vec<PaperId>, QueueError> {
        let pool = self.db.pool();
        let ids: Vec<String> = self.db.with_retry("queue list", || async move {
            sqlx::query_scalar("SELECT paper_id FROM task_queue ORDER BY seq")
                .fetch_all(pool)
                .await
        })?;
        Ok(ids.into_iter().map(PaperId::from).collect())
    }

    fn lease_ms(&self) -> i64 {
        self.lease_timeout.as_millis().min(i64::MAX as u128) as i64
    }

    fn count(&self, sql: &'static str, now: Option<i64>) -> Result<u64, QueueError> {
        let pool = self.db.pool();
        let n: i64 = self.db.with_retry("queue count", || async move {
            let mut query = sqlx::query_scalar(sql);
            if let Some(now) = now {
                query = query.bind(now);
            }
            query.fetch_one(pool).await
        })?;
        Ok(n.max(0) as u64)
    }
}

fn payload_err(e: sqlx::Error) -> QueueError {
    QueueError::Payload(e.to_string())
}
