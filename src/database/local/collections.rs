//! Key-value record store
//!
//! Each collection is a single JSON document holding the full ordered sequence of
//! its records. Reads and writes never fail from the caller's point of view: a broken
//! or missing document reads as empty and a failed write is logged and skipped.

use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Routes,
    Points,
    Children,
    Attendance,
    Occurrences,
}

impl Collection {
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Routes => "routes",
            Collection::Points => "points",
            Collection::Children => "children",
            Collection::Attendance => "attendance",
            Collection::Occurrences => "occurrences",
        }
    }
}

/// Read the full sequence stored for `collection`
pub async fn get<T: DeserializeOwned>(pool: &SqlitePool, collection: Collection) -> Vec<T> {
    let raw = match read_document(pool, collection).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            log::warn!("[store] {}", e);
            return Vec::new();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|e| {
        log::warn!(
            "[store] Discarding unreadable '{}' collection: {}",
            collection.key(),
            e
        );
        Vec::new()
    })
}

/// Replace the full sequence stored for `collection`
pub async fn put<T: Serialize>(pool: &SqlitePool, collection: Collection, items: &[T]) {
    let raw = match serde_json::to_string(items) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!(
                "[store] Failed to encode '{}' collection: {}",
                collection.key(),
                e
            );
            return;
        }
    };

    if let Err(e) = write_document(pool, collection, &raw).await {
        log::warn!("[store] {}", e);
    }
}

async fn read_document(pool: &SqlitePool, collection: Collection) -> Result<Option<String>, String> {
    sqlx::query_scalar::<_, String>("SELECT value FROM collections WHERE key = ?")
        .bind(collection.key())
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("Failed to read '{}' collection: {}", collection.key(), e))
}

async fn write_document(pool: &SqlitePool, collection: Collection, raw: &str) -> Result<(), String> {
    sqlx::query(
        "INSERT INTO collections (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
    )
    .bind(collection.key())
    .bind(raw)
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to write '{}' collection: {}", collection.key(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_in_memory;
    use crate::models::roster::Route;
    use chrono::{TimeZone, Utc};

    fn route(id: &str) -> Route {
        Route {
            id: id.to_string(),
            name: format!("Route {id}"),
            description: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_collection_reads_empty() {
        let db = open_in_memory().await.unwrap();
        let routes: Vec<Route> = get(&db.0, Collection::Routes).await;
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn put_replaces_whole_collection_and_keeps_order() {
        let db = open_in_memory().await.unwrap();
        put(&db.0, Collection::Routes, &[route("a"), route("b")]).await;
        put(&db.0, Collection::Routes, &[route("c"), route("a")]).await;

        let routes: Vec<Route> = get(&db.0, Collection::Routes).await;
        let ids: Vec<&str> = routes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        // dates come back as dates, not strings
        assert_eq!(routes[0].created_at, route("c").created_at);
    }

    #[tokio::test]
    async fn corrupt_document_degrades_to_empty() {
        let db = open_in_memory().await.unwrap();
        sqlx::query("INSERT INTO collections (key, value) VALUES ('routes', '{not json')")
            .execute(&db.0)
            .await
            .unwrap();

        let routes: Vec<Route> = get(&db.0, Collection::Routes).await;
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_a_no_op() {
        let db = open_in_memory().await.unwrap();
        put(&db.0, Collection::Routes, &[route("a")]).await;
        sqlx::query("DROP TABLE collections").execute(&db.0).await.unwrap();

        // neither call may panic or error out
        put(&db.0, Collection::Routes, &[route("b")]).await;
        let routes: Vec<Route> = get(&db.0, Collection::Routes).await;
        assert!(routes.is_empty());
    }
}
