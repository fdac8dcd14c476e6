//! Durable FIFO of pending mutations
//!
//! Rows are drained in `seq` order. An operation leaves the queue either when it is
//! applied remotely (`remove`) or when its retry counter reaches `MAX_RETRIES`
//! (`record_failure`), in which case the drop is counted in `sync_state`.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::state::DROPPED_OPERATIONS_KEY;
use crate::models::sync::{EntityPayload, OperationType, SyncOperation, SyncTable, MAX_RETRIES};

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    op_type: String,
    table_name: String,
    data: String,
    local_id: String,
    timestamp: i64,
    retries: i64,
}

impl TryFrom<QueueRow> for SyncOperation {
    type Error = String;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let op_type = OperationType::parse(&row.op_type)
            .ok_or_else(|| format!("unknown operation type '{}'", row.op_type))?;
        let table = SyncTable::parse(&row.table_name)
            .ok_or_else(|| format!("unknown table '{}'", row.table_name))?;
        let data: EntityPayload = serde_json::from_str(&row.data)
            .map_err(|e| format!("unreadable payload: {}", e))?;

        Ok(SyncOperation {
            id: row.id,
            op_type,
            table,
            data,
            local_id: row.local_id,
            timestamp: row.timestamp,
            retries: row.retries,
        })
    }
}

/// What happened to an operation after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still queued; `retries` attempts have failed so far
    Retrying { retries: i64 },
    /// Retries exhausted, removed from the queue
    Dropped,
    /// No such operation (already removed)
    Missing,
}

/// Append a new operation with `retries = 0`. The target table follows from the payload.
pub async fn enqueue(
    pool: &SqlitePool,
    op_type: OperationType,
    data: EntityPayload,
    local_id: &str,
) -> Result<SyncOperation, String> {
    let operation = SyncOperation {
        id: Uuid::new_v4().to_string(),
        op_type,
        table: data.table(),
        data,
        local_id: local_id.to_string(),
        timestamp: Utc::now().timestamp_millis(),
        retries: 0,
    };

    let data_json = serde_json::to_string(&operation.data)
        .map_err(|e| format!("Failed to encode sync payload: {}", e))?;

    sqlx::query(
        "INSERT INTO sync_queue (id, op_type, table_name, data, local_id, timestamp, retries)
        VALUES (?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(&operation.id)
    .bind(operation.op_type.as_str())
    .bind(operation.table.as_str())
    .bind(&data_json)
    .bind(&operation.local_id)
    .bind(operation.timestamp)
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to enqueue sync operation: {}", e))?;

    log::debug!(
        "[queue] + {} {} {}",
        operation.op_type.as_str(),
        operation.table,
        operation.local_id
    );
    Ok(operation)
}

/// Remove an operation and count it as dropped
async fn drop_counted(conn: &mut SqliteConnection, operation_id: &str) -> Result<(), String> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(operation_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to drop sync operation: {}", e))?;

    sqlx::query(
        "INSERT INTO sync_state (key, value) VALUES (?, '1')
        ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1",
    )
    .bind(DROPPED_OPERATIONS_KEY)
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to count dropped operation: {}", e))?;
    Ok(())
}

/// All pending operations in enqueue order. Undecodable rows can never be sent, so
/// they are dropped (and counted) on sight.
pub async fn peek_all(pool: &SqlitePool) -> Result<Vec<SyncOperation>, String> {
    let rows = sqlx::query_as::<_, QueueRow>(
        "SELECT id, op_type, table_name, data, local_id, timestamp, retries
        FROM sync_queue ORDER BY seq ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to read sync queue: {}", e))?;

    let mut operations = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match SyncOperation::try_from(row) {
            Ok(op) => operations.push(op),
            Err(e) => {
                log::error!("[queue] Dropping undecodable operation {}: {}", id, e);
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|e| format!("Failed to start transaction: {}", e))?;
                drop_counted(&mut *tx, &id).await?;
                tx.commit()
                    .await
                    .map_err(|e| format!("Failed to commit dropped operation: {}", e))?;
            }
        }
    }
    Ok(operations)
}

/// Remove every pending operation for one local record. Returns how many were removed.
pub async fn remove_for_record(pool: &SqlitePool, local_id: &str) -> Result<u64, String> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE local_id = ?")
        .bind(local_id)
        .execute(pool)
        .await
        .map_err(|e| format!("Failed to remove sync operations for {}: {}", local_id, e))?;
    Ok(result.rows_affected())
}

/// Turn a record's pending inserts into updates, for when the row turned out to
/// exist server-side already
pub async fn inserts_to_updates(pool: &SqlitePool, local_id: &str) -> Result<u64, String> {
    let result = sqlx::query(
        "UPDATE sync_queue SET op_type = 'update' WHERE local_id = ? AND op_type = 'insert'",
    )
    .bind(local_id)
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to rewrite sync operations for {}: {}", local_id, e))?;
    Ok(result.rows_affected())
}

pub async fn remove(pool: &SqlitePool, operation_id: &str) -> Result<(), String> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(operation_id)
        .execute(pool)
        .await
        .map_err(|e| format!("Failed to remove sync operation: {}", e))?;
    Ok(())
}

/// Count one failed attempt; drops the operation once it reaches `MAX_RETRIES`
pub async fn record_failure(pool: &SqlitePool, operation_id: &str) -> Result<FailureOutcome, String> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| format!("Failed to start transaction: {}", e))?;

    let retries = sqlx::query_scalar::<_, i64>(
        "UPDATE sync_queue SET retries = retries + 1 WHERE id = ? RETURNING retries",
    )
    .bind(operation_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| format!("Failed to update retry count: {}", e))?;

    let Some(retries) = retries else {
        return Ok(FailureOutcome::Missing);
    };

    let outcome = if retries >= MAX_RETRIES {
        drop_counted(&mut *tx, operation_id).await?;
        FailureOutcome::Dropped
    } else {
        FailureOutcome::Retrying { retries }
    };

    tx.commit()
        .await
        .map_err(|e| format!("Failed to commit retry update: {}", e))?;

    if outcome == FailureOutcome::Dropped {
        log::error!(
            "[queue] Max retries reached, dropping operation {}",
            operation_id
        );
    }
    Ok(outcome)
}

/// Number of operations waiting to be sent
pub async fn depth(pool: &SqlitePool) -> Result<i64, String> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_queue")
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to count sync queue: {}", e))
}
