//! local id -> server id translation table. Entries are only ever added or overwritten.

use sqlx::SqlitePool;

pub async fn resolve(pool: &SqlitePool, local_id: &str) -> Result<Option<String>, String> {
    sqlx::query_scalar::<_, String>("SELECT server_id FROM id_map WHERE local_id = ?")
        .bind(local_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("Failed to resolve id {}: {}", local_id, e))
}

pub async fn record(pool: &SqlitePool, local_id: &str, server_id: &str) -> Result<(), String> {
    sqlx::query(
        "INSERT INTO id_map (local_id, server_id) VALUES (?, ?)
        ON CONFLICT(local_id) DO UPDATE SET server_id = excluded.server_id",
    )
    .bind(local_id)
    .bind(server_id)
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to record id mapping {}: {}", local_id, e))?;
    Ok(())
}

/// Whether `id` is known to exist server-side (as the target of any mapping)
pub async fn is_server_id(pool: &SqlitePool, id: &str) -> Result<bool, String> {
    let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM id_map WHERE server_id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("Failed to look up server id {}: {}", id, e))?;
    Ok(found.is_some())
}
