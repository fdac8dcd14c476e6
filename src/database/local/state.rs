//! Sync markers kept alongside the data: last successful sync, completion of the
//! initial download, and the running count of operations dropped after exhausting
//! their retries.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub const LAST_SYNC_KEY: &str = "last_sync";
pub const INITIAL_DOWNLOAD_KEY: &str = "initial_download";
pub const DROPPED_OPERATIONS_KEY: &str = "dropped_operations";

pub async fn get_state_item(pool: &SqlitePool, key: &str) -> Result<Option<String>, String> {
    sqlx::query_scalar::<_, String>("SELECT value FROM sync_state WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|err| format!("Failed to read sync state: {err}"))
}

pub async fn set_state_item(pool: &SqlitePool, key: &str, value: &str) -> Result<(), String> {
    sqlx::query(
        "INSERT INTO sync_state (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .map_err(|err| format!("Failed to store sync state: {err}"))?;
    Ok(())
}

/// When the last successful sync completed, if ever
pub async fn last_synced_at(pool: &SqlitePool) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = get_state_item(pool, LAST_SYNC_KEY).await? else {
        return Ok(None);
    };

    match DateTime::parse_from_rfc3339(&raw) {
        Ok(at) => Ok(Some(at.with_timezone(&Utc))),
        Err(err) => {
            // a garbled marker still proves a sync happened
            log::warn!("[state] Unreadable last sync marker '{}': {}", raw, err);
            Ok(Some(DateTime::<Utc>::default()))
        }
    }
}

pub async fn set_last_synced_at(pool: &SqlitePool, at: DateTime<Utc>) -> Result<(), String> {
    set_state_item(pool, LAST_SYNC_KEY, &at.to_rfc3339()).await
}

/// Only a download in which every collection came through may set this
pub async fn set_initial_download_complete(pool: &SqlitePool, at: DateTime<Utc>) -> Result<(), String> {
    set_state_item(pool, INITIAL_DOWNLOAD_KEY, &at.to_rfc3339()).await
}

/// True until a complete download of server state has been merged. Drain passes
/// move the last-sync marker but never this one.
pub async fn needs_initial_sync(pool: &SqlitePool) -> Result<bool, String> {
    Ok(get_state_item(pool, INITIAL_DOWNLOAD_KEY).await?.is_none())
}

pub async fn dropped_operations(pool: &SqlitePool) -> Result<i64, String> {
    let raw = get_state_item(pool, DROPPED_OPERATIONS_KEY).await?;
    Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
}
