//! SQLite ledger store.
//!
//! Persists blocks, transactions, transfers, batches, attestations and
//! checkpoints to a single SQLite file. Multi-entity writes run inside one
//! `sqlx` transaction.
//!
//! # Usage
//! ```rust,no_run
//! use chainanchor_storage::sqlite::SqliteLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteLedger::open("./chainanchor.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteLedger::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use chainanchor_core::error::IndexerError;
use chainanchor_core::query::Direction;
use chainanchor_core::store::{BatchCommit, LedgerStore, SeekRequest};
use chainanchor_core::types::{
    Attestation, AttestationStatus, BatchRecord, BatchStatus, Checkpoint, IndexedBatch, Transfer,
};

fn storage(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, IndexerError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| storage(format!("timestamp {ms} out of range")))
}

fn expect_one(rows: u64, batch_id: &str) -> Result<(), IndexerError> {
    if rows == 0 {
        return Err(storage(format!("batch {batch_id} not found")));
    }
    Ok(())
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, IndexerError> {
    ms.map(from_millis).transpose()
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checkpoints (
        chain_id           TEXT    PRIMARY KEY,
        start_block        INTEGER NOT NULL,
        last_indexed_block INTEGER,
        last_indexed_hash  TEXT,
        safe_block_number  INTEGER NOT NULL,
        updated_at         INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS blocks (
        chain_id    TEXT    NOT NULL,
        number      INTEGER NOT NULL,
        hash        TEXT    NOT NULL,
        parent_hash TEXT    NOT NULL,
        timestamp   INTEGER NOT NULL,
        tx_count    INTEGER NOT NULL,
        PRIMARY KEY (chain_id, number),
        UNIQUE (chain_id, hash)
    );",
    "CREATE TABLE IF NOT EXISTS transactions (
        chain_id          TEXT    NOT NULL,
        hash              TEXT    NOT NULL,
        block_number      INTEGER NOT NULL,
        transaction_index INTEGER NOT NULL,
        from_address      TEXT    NOT NULL,
        to_address        TEXT,
        value             TEXT    NOT NULL,
        PRIMARY KEY (chain_id, hash)
    );",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions (chain_id, block_number);",
    "CREATE TABLE IF NOT EXISTS transfers (
        chain_id     TEXT    NOT NULL,
        id           TEXT    NOT NULL,
        tx_hash      TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        token        TEXT    NOT NULL,
        from_address TEXT    NOT NULL,
        to_address   TEXT    NOT NULL,
        value        TEXT    NOT NULL,
        PRIMARY KEY (chain_id, id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_transfers_order ON transfers (chain_id, block_number, log_index, id);",
    "CREATE TABLE IF NOT EXISTS batches (
        chain_id                TEXT    NOT NULL,
        id                      TEXT    NOT NULL,
        start_block             INTEGER NOT NULL,
        end_block               INTEGER NOT NULL,
        merkle_root             TEXT    NOT NULL,
        leaf_count              INTEGER NOT NULL,
        safe_block_number       INTEGER NOT NULL,
        total_blocks            INTEGER NOT NULL,
        total_transactions      INTEGER NOT NULL,
        total_transfers         INTEGER NOT NULL,
        prover_address          TEXT,
        sql_statement           TEXT,
        onchain_status          TEXT    NOT NULL DEFAULT 'NOT_READY',
        onchain_tx_hash         TEXT,
        reward_amount           TEXT,
        onchain_error           TEXT,
        last_submission_attempt INTEGER,
        onchain_submitted_at    INTEGER,
        created_at              INTEGER NOT NULL,
        PRIMARY KEY (chain_id, id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_batches_status ON batches (chain_id, onchain_status, created_at);",
    "CREATE TABLE IF NOT EXISTS attestations (
        chain_id    TEXT NOT NULL,
        batch_id    TEXT NOT NULL,
        attestor    TEXT NOT NULL,
        status      TEXT NOT NULL,
        merkle_root TEXT NOT NULL,
        signature   TEXT NOT NULL,
        PRIMARY KEY (chain_id, batch_id, attestor)
    );",
];

/// SQLite-backed ledger store.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainanchor.db"`) or a full
    /// SQLite URL (`"sqlite:./chainanchor.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection is used so every query sees the same database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(storage)?;
        }
        Ok(())
    }
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, IndexerError> {
    Ok(Checkpoint {
        chain_id: row.get("chain_id"),
        start_block: row.get::<i64, _>("start_block") as u64,
        last_indexed_block: row.get::<Option<i64>, _>("last_indexed_block").map(|n| n as u64),
        last_indexed_hash: row.get("last_indexed_hash"),
        safe_block_number: row.get::<i64, _>("safe_block_number") as u64,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

fn transfer_from_row(row: &SqliteRow) -> Transfer {
    Transfer {
        id: row.get("id"),
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i64, _>("log_index") as u64,
        block_number: row.get::<i64, _>("block_number") as u64,
        token: row.get("token"),
        from: row.get("from_address"),
        to: row.get("to_address"),
        value: row.get("value"),
    }
}

fn batch_from_row(row: &SqliteRow) -> Result<IndexedBatch, IndexerError> {
    let status: String = row.get("onchain_status");
    Ok(IndexedBatch {
        chain_id: row.get("chain_id"),
        record: BatchRecord {
            id: row.get("id"),
            start_block: row.get::<i64, _>("start_block") as u64,
            end_block: row.get::<i64, _>("end_block") as u64,
            merkle_root: row.get("merkle_root"),
            leaf_count: row.get::<i64, _>("leaf_count") as u64,
            safe_block_number: row.get::<i64, _>("safe_block_number") as u64,
            total_blocks: row.get::<i64, _>("total_blocks") as u64,
            total_transactions: row.get::<i64, _>("total_transactions") as u64,
            total_transfers: row.get::<i64, _>("total_transfers") as u64,
        },
        prover_address: row.get("prover_address"),
        sql_statement: row.get("sql_statement"),
        onchain_status: status.parse::<BatchStatus>().map_err(storage)?,
        onchain_tx_hash: row.get("onchain_tx_hash"),
        reward_amount: row.get("reward_amount"),
        onchain_error: row.get("onchain_error"),
        last_submission_attempt: opt_from_millis(row.get("last_submission_attempt"))?,
        onchain_submitted_at: opt_from_millis(row.get("onchain_submitted_at"))?,
        created_at: from_millis(row.get("created_at"))?,
    })
}

const UPSERT_CHECKPOINT: &str = "INSERT INTO checkpoints
        (chain_id, start_block, last_indexed_block, last_indexed_hash, safe_block_number, updated_at)
     VALUES (?, ?, ?, ?, ?, ?)
     ON CONFLICT (chain_id) DO UPDATE SET
        start_block        = excluded.start_block,
        last_indexed_block = excluded.last_indexed_block,
        last_indexed_hash  = excluded.last_indexed_hash,
        safe_block_number  = excluded.safe_block_number,
        updated_at         = excluded.updated_at";

fn bind_checkpoint<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    cp: &'q Checkpoint,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&cp.chain_id)
        .bind(cp.start_block as i64)
        .bind(cp.last_indexed_block.map(|n| n as i64))
        .bind(&cp.last_indexed_hash)
        .bind(cp.safe_block_number as i64)
        .bind(millis(cp.updated_at))
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn load_checkpoint(&self, chain_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE chain_id = ?")
            .bind(chain_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        bind_checkpoint(sqlx::query(UPSERT_CHECKPOINT), checkpoint)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn block_hash(&self, chain_id: &str, number: u64) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT hash FROM blocks WHERE chain_id = ? AND number = ?")
            .bind(chain_id)
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|r| r.get("hash")))
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<(), IndexerError> {
        let chain = commit.chain_id.as_str();
        let mut tx = self.pool.begin().await.map_err(storage)?;

        for block in &commit.blocks {
            let n = block.number as i64;
            sqlx::query("DELETE FROM transactions WHERE chain_id = ? AND block_number = ?")
                .bind(chain)
                .bind(n)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            sqlx::query("DELETE FROM transfers WHERE chain_id = ? AND block_number = ?")
                .bind(chain)
                .bind(n)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            sqlx::query(
                "INSERT INTO blocks (chain_id, number, hash, parent_hash, timestamp, tx_count)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (chain_id, number) DO UPDATE SET
                    hash        = excluded.hash,
                    parent_hash = excluded.parent_hash,
                    timestamp   = excluded.timestamp,
                    tx_count    = excluded.tx_count",
            )
            .bind(chain)
            .bind(n)
            .bind(&block.hash)
            .bind(&block.parent_hash)
            .bind(block.timestamp)
            .bind(block.tx_count as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        for record in &commit.transactions {
            sqlx::query(
                "INSERT OR IGNORE INTO transactions
                    (chain_id, hash, block_number, transaction_index, from_address, to_address, value)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chain)
            .bind(&record.hash)
            .bind(record.block_number as i64)
            .bind(record.transaction_index as i64)
            .bind(&record.from)
            .bind(&record.to)
            .bind(&record.value)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        for transfer in &commit.transfers {
            sqlx::query(
                "INSERT OR IGNORE INTO transfers
                    (chain_id, id, tx_hash, log_index, block_number, token, from_address, to_address, value)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chain)
            .bind(&transfer.id)
            .bind(&transfer.tx_hash)
            .bind(transfer.log_index as i64)
            .bind(transfer.block_number as i64)
            .bind(&transfer.token)
            .bind(&transfer.from)
            .bind(&transfer.to)
            .bind(&transfer.value)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        let batch = &commit.batch;
        sqlx::query(
            "INSERT INTO batches
                (chain_id, id, start_block, end_block, merkle_root, leaf_count, safe_block_number,
                 total_blocks, total_transactions, total_transfers, onchain_status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'NOT_READY', ?)
             ON CONFLICT (chain_id, id) DO UPDATE SET
                start_block        = excluded.start_block,
                end_block          = excluded.end_block,
                merkle_root        = excluded.merkle_root,
                leaf_count         = excluded.leaf_count,
                safe_block_number  = excluded.safe_block_number,
                total_blocks       = excluded.total_blocks,
                total_transactions = excluded.total_transactions,
                total_transfers    = excluded.total_transfers",
        )
        .bind(chain)
        .bind(&batch.id)
        .bind(batch.start_block as i64)
        .bind(batch.end_block as i64)
        .bind(&batch.merkle_root)
        .bind(batch.leaf_count as i64)
        .bind(batch.safe_block_number as i64)
        .bind(batch.total_blocks as i64)
        .bind(batch.total_transactions as i64)
        .bind(batch.total_transfers as i64)
        .bind(millis(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        bind_checkpoint(sqlx::query(UPSERT_CHECKPOINT), &commit.checkpoint)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        debug!(chain, batch = %batch.id, transfers = commit.transfers.len(), "batch committed");
        Ok(())
    }

    async fn rollback_after(
        &self,
        chain_id: &str,
        block: u64,
        checkpoint: &Checkpoint,
    ) -> Result<(), IndexerError> {
        let n = block as i64;
        let mut tx = self.pool.begin().await.map_err(storage)?;

        for sql in [
            "DELETE FROM batches WHERE chain_id = ? AND end_block > ?",
            "DELETE FROM transfers WHERE chain_id = ? AND block_number > ?",
            "DELETE FROM transactions WHERE chain_id = ? AND block_number > ?",
            "DELETE FROM blocks WHERE chain_id = ? AND number > ?",
        ] {
            sqlx::query(sql)
                .bind(chain_id)
                .bind(n)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        bind_checkpoint(sqlx::query(UPSERT_CHECKPOINT), checkpoint)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn count_blocks(&self, chain_id: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM blocks WHERE chain_id = ?")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn count_transfers(&self, chain_id: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM transfers WHERE chain_id = ?")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn seek_transfers(&self, request: &SeekRequest) -> Result<Vec<Transfer>, IndexerError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT t.* FROM transfers t
             LEFT JOIN blocks b ON b.chain_id = t.chain_id AND b.number = t.block_number
             WHERE t.chain_id = ",
        );
        qb.push_bind(request.chain_id.clone());

        if let Some(from) = request.from_block {
            qb.push(" AND t.block_number >= ").push_bind(from as i64);
        }
        if let Some(to) = request.to_block {
            qb.push(" AND t.block_number <= ").push_bind(to as i64);
        }
        if let Some(address) = &request.address {
            let address = address.to_lowercase();
            qb.push(" AND (lower(t.from_address) = ")
                .push_bind(address.clone())
                .push(" OR lower(t.to_address) = ")
                .push_bind(address)
                .push(")");
        }
        if let Some(token) = &request.token {
            qb.push(" AND lower(t.token) = ").push_bind(token.to_lowercase());
        }
        // Values are canonical decimal strings: compare by length, then text.
        if let Some(min) = request.min_value {
            let min = min.to_string();
            qb.push(" AND (length(t.value) > ")
                .push_bind(min.len() as i64)
                .push(" OR (length(t.value) = ")
                .push_bind(min.len() as i64)
                .push(" AND t.value >= ")
                .push_bind(min)
                .push("))");
        }
        if let Some(max) = request.max_value {
            let max = max.to_string();
            qb.push(" AND (length(t.value) < ")
                .push_bind(max.len() as i64)
                .push(" OR (length(t.value) = ")
                .push_bind(max.len() as i64)
                .push(" AND t.value <= ")
                .push_bind(max)
                .push("))");
        }
        if let Some(from) = request.from_timestamp {
            qb.push(" AND b.timestamp >= ").push_bind(from);
        }
        if let Some(to) = request.to_timestamp {
            qb.push(" AND b.timestamp <= ").push_bind(to);
        }

        let (cmp, order) = match request.direction {
            Direction::Asc => (">", "ASC"),
            Direction::Desc => ("<", "DESC"),
        };
        if let Some(anchor) = &request.after {
            qb.push(format!(" AND (t.block_number, t.log_index, t.id) {cmp} ("))
                .push_bind(anchor.block_number as i64)
                .push(", ")
                .push_bind(anchor.log_index as i64)
                .push(", ")
                .push_bind(anchor.id.clone())
                .push(")");
        }
        qb.push(format!(
            " ORDER BY t.block_number {order}, t.log_index {order}, t.id {order} LIMIT "
        ))
        .push_bind(request.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(storage)?;
        Ok(rows.iter().map(transfer_from_row).collect())
    }

    async fn get_batch(&self, chain_id: &str, batch_id: &str) -> Result<Option<IndexedBatch>, IndexerError> {
        let row = sqlx::query("SELECT * FROM batches WHERE chain_id = ? AND id = ?")
            .bind(chain_id)
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn recent_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM batches WHERE chain_id = ? ORDER BY start_block DESC LIMIT ?")
            .bind(chain_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn submittable_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM batches
             WHERE chain_id = ?
               AND prover_address IS NOT NULL
               AND onchain_status IN ('NOT_READY', 'FAILED')
             ORDER BY created_at ASC, start_block ASC
             LIMIT ?",
        )
        .bind(chain_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn assign_prover(
        &self,
        chain_id: &str,
        batch_id: &str,
        prover: &str,
        sql_statement: Option<&str>,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "UPDATE batches SET prover_address = ?, sql_statement = ? WHERE chain_id = ? AND id = ?",
        )
        .bind(prover)
        .bind(sql_statement)
        .bind(chain_id)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_batch_status(&self, chain_id: &str, batch_id: &str, status: BatchStatus) -> Result<(), IndexerError> {
        let result = sqlx::query("UPDATE batches SET onchain_status = ? WHERE chain_id = ? AND id = ?")
            .bind(status.as_str())
            .bind(chain_id)
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        expect_one(result.rows_affected(), batch_id)
    }

    async fn claim_batch(&self, chain_id: &str, batch_id: &str, at: DateTime<Utc>) -> Result<u64, IndexerError> {
        let result = sqlx::query(
            "UPDATE batches
             SET onchain_status = 'PENDING', last_submission_attempt = ?
             WHERE chain_id = ? AND id = ? AND onchain_status IN ('NOT_READY', 'FAILED')",
        )
        .bind(millis(at))
        .bind(chain_id)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn mark_confirmed(
        &self,
        chain_id: &str,
        batch_id: &str,
        tx_hash: &str,
        reward: &str,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let result = sqlx::query(
            "UPDATE batches
             SET onchain_status = 'CONFIRMED', onchain_tx_hash = ?, reward_amount = ?,
                 onchain_submitted_at = ?, onchain_error = NULL
             WHERE chain_id = ? AND id = ?",
        )
        .bind(tx_hash)
        .bind(reward)
        .bind(millis(at))
        .bind(chain_id)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        expect_one(result.rows_affected(), batch_id)
    }

    async fn mark_failed(
        &self,
        chain_id: &str,
        batch_id: &str,
        error: &str,
        reward: Option<&str>,
    ) -> Result<(), IndexerError> {
        let result = sqlx::query(
            "UPDATE batches
             SET onchain_status = 'FAILED', onchain_error = ?,
                 reward_amount = COALESCE(?, reward_amount)
             WHERE chain_id = ? AND id = ?",
        )
        .bind(error)
        .bind(reward)
        .bind(chain_id)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        expect_one(result.rows_affected(), batch_id)
    }

    async fn record_attestation(&self, attestation: &Attestation) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO attestations (chain_id, batch_id, attestor, status, merkle_root, signature)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (chain_id, batch_id, attestor) DO UPDATE SET
                status      = excluded.status,
                merkle_root = excluded.merkle_root,
                signature   = excluded.signature",
        )
        .bind(&attestation.chain_id)
        .bind(&attestation.batch_id)
        .bind(attestation.attestor.to_lowercase())
        .bind(attestation.status.as_str())
        .bind(&attestation.merkle_root)
        .bind(&attestation.signature)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn count_valid_attestations(&self, chain_id: &str, batch_id: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM attestations WHERE chain_id = ? AND batch_id = ? AND status = ?",
        )
        .bind(chain_id)
        .bind(batch_id)
        .bind(AttestationStatus::Valid.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }
}
