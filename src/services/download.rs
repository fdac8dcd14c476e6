//! Initial download: pull the identity's rows and merge them into the local store
//!
//! Each collection is handled on its own. The merged collection is every remote row
//! (in local shape) followed by the local rows the server does not know, so nothing
//! created offline is lost. A local row that was uploaded earlier comes back under
//! its server id; the local copy is dropped and its dependents are relinked to the
//! server row. Re-running with unchanged remote data is a no-op.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

use super::cloud_sync::CloudSyncError;
use crate::database::local::collections::{self, Collection};
use crate::database::local::{id_map, queue, state};
use crate::database::remote::rows::{RemoteAttendance, RemoteChild, RemotePoint, RemoteRoute};
use crate::database::remote::RemoteBackend;
use crate::models::attendance::{Attendance, Occurrence};
use crate::models::roster::{Child, Point, Route};
use crate::models::sync::{Identity, SyncTable};
use crate::models::Record;

/// Local ids whose record came back from the server, mapped to the server id
type Replaced = HashMap<String, String>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownloadStats {
    pub routes: usize,
    pub points: usize,
    pub children: usize,
    pub attendance: usize,
    pub errors: Vec<String>,
}

impl DownloadStats {
    pub fn total(&self) -> usize {
        self.routes + self.points + self.children + self.attendance
    }

    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            format!("Downloaded {} records", self.total())
        } else {
            format!(
                "Downloaded {} records, {} collections failed",
                self.total(),
                self.errors.len()
            )
        }
    }
}

/// An attendance record discarded by [`dedupe_attendance`] and the one kept for its day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superseded {
    pub dropped: String,
    pub kept: String,
}

/// Remote rows first, then local rows unknown remotely. Order within each part is kept.
pub fn merge_by_id<T: Record>(remote: Vec<T>, local: Vec<T>) -> Vec<T> {
    let remote_ids: HashSet<String> = remote.iter().map(|r| r.id().to_string()).collect();
    let mut merged = remote;
    merged.extend(local.into_iter().filter(|l| !remote_ids.contains(l.id())));
    merged
}

/// One record per (child, date): the one with the latest timestamp, at the position
/// of the first occurrence of the pair. Also returns what was discarded for what.
pub fn dedupe_attendance(records: Vec<Attendance>) -> (Vec<Attendance>, Vec<Superseded>) {
    let mut slots: HashMap<(String, chrono::NaiveDate), usize> = HashMap::new();
    let mut kept: Vec<Attendance> = Vec::with_capacity(records.len());
    let mut dropped: Vec<(String, usize)> = Vec::new();

    for record in records {
        let key = (record.child_id.clone(), record.date);
        match slots.get(&key) {
            Some(&index) => {
                if record.timestamp > kept[index].timestamp {
                    let older = std::mem::replace(&mut kept[index], record);
                    dropped.push((older.id, index));
                } else {
                    dropped.push((record.id, index));
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(record);
            }
        }
    }

    let superseded = dropped
        .into_iter()
        .map(|(id, index)| Superseded {
            dropped: id,
            kept: kept[index].id.clone(),
        })
        .collect();
    (kept, superseded)
}

/// Point a record's parent reference at the server row that replaced it
fn relink<T: Record>(record: &mut T, replaced: &Replaced) {
    if let Some(parent) = record.parent_mut() {
        if let Some(server_id) = replaced.get(parent.as_str()) {
            *parent = server_id.clone();
        }
    }
}

pub struct Downloader<'a, B: RemoteBackend + ?Sized> {
    pool: &'a SqlitePool,
    backend: &'a B,
    identity: &'a Identity,
}

impl<'a, B: RemoteBackend + ?Sized> Downloader<'a, B> {
    pub fn new(pool: &'a SqlitePool, backend: &'a B, identity: &'a Identity) -> Self {
        Self {
            pool,
            backend,
            identity,
        }
    }

    /// Pull and merge every synced collection, parents first.
    ///
    /// The initial-download marker is only written when every collection came
    /// through, so a partial download is retried on the next trigger.
    pub async fn run(&self) -> Result<DownloadStats, CloudSyncError> {
        let mut stats = DownloadStats::default();
        let mut replaced = Replaced::new();

        match self
            .merge::<RemoteRoute, Route>(SyncTable::Routes, Collection::Routes, &mut replaced)
            .await
        {
            Ok(n) => stats.routes = n,
            Err(e) => stats.errors.push(format!("Routes: {}", e)),
        }

        match self
            .merge::<RemotePoint, Point>(SyncTable::Points, Collection::Points, &mut replaced)
            .await
        {
            Ok(n) => stats.points = n,
            Err(e) => stats.errors.push(format!("Points: {}", e)),
        }

        match self
            .merge::<RemoteChild, Child>(SyncTable::Children, Collection::Children, &mut replaced)
            .await
        {
            Ok(n) => stats.children = n,
            Err(e) => stats.errors.push(format!("Children: {}", e)),
        }

        match self.merge_attendance(&mut replaced).await {
            Ok(n) => stats.attendance = n,
            Err(e) => stats.errors.push(format!("Attendance: {}", e)),
        }

        if !replaced.is_empty() {
            let mut occurrences: Vec<Occurrence> =
                collections::get(self.pool, Collection::Occurrences).await;
            for occurrence in &mut occurrences {
                relink(occurrence, &replaced);
            }
            collections::put(self.pool, Collection::Occurrences, &occurrences).await;
        }

        if stats.errors.is_empty() {
            let now = Utc::now();
            state::set_initial_download_complete(self.pool, now)
                .await
                .map_err(CloudSyncError::LocalDb)?;
            state::set_last_synced_at(self.pool, now)
                .await
                .map_err(CloudSyncError::LocalDb)?;
            log::info!("[download] {}", stats.summary());
        } else {
            log::warn!("[download] {}: {}", stats.summary(), stats.errors.join("; "));
        }
        Ok(stats)
    }

    /// Merge one collection. Returns how many remote rows were taken in.
    async fn merge<R, T>(
        &self,
        table: SyncTable,
        collection: Collection,
        replaced: &mut Replaced,
    ) -> Result<usize, CloudSyncError>
    where
        R: DeserializeOwned + Into<T>,
        T: Record + Serialize + DeserializeOwned,
    {
        let remote = self.pull::<R, T>(table).await?;
        let count = remote.len();
        let local = self.local_rows(collection, &remote, replaced).await?;
        let merged = merge_by_id(remote, local);
        collections::put(self.pool, collection, &merged).await;

        log::debug!("[download] {}: {} remote, {} total", table, count, merged.len());
        Ok(count)
    }

    /// Like [`Self::merge`], then one record per child and day. Queued operations of
    /// the discarded records are settled so the day never gets a second server row.
    async fn merge_attendance(&self, replaced: &mut Replaced) -> Result<usize, CloudSyncError> {
        let remote = self
            .pull::<RemoteAttendance, Attendance>(SyncTable::Attendance)
            .await?;
        let count = remote.len();
        let remote_ids: HashSet<String> = remote.iter().map(|r| r.id.clone()).collect();

        let local = self
            .local_rows(Collection::Attendance, &remote, replaced)
            .await?;
        let (merged, superseded) = dedupe_attendance(merge_by_id(remote, local));
        collections::put(self.pool, Collection::Attendance, &merged).await;

        for entry in &superseded {
            self.settle(entry, &remote_ids).await?;
        }

        log::debug!("[download] attendance: {} remote, {} total", count, merged.len());
        Ok(count)
    }

    async fn settle(&self, entry: &Superseded, remote_ids: &HashSet<String>) -> Result<(), CloudSyncError> {
        match (remote_ids.contains(&entry.dropped), remote_ids.contains(&entry.kept)) {
            // a newer server mark won; the local one must not be sent any more
            (false, true) => {
                let removed = queue::remove_for_record(self.pool, &entry.dropped)
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
                if removed > 0 {
                    log::info!(
                        "[download] Attendance {} superseded by {}, {} queued operations discarded",
                        entry.dropped,
                        entry.kept,
                        removed
                    );
                }
            }
            // the local mark won; it now updates the server row for that day
            (true, false) => {
                id_map::record(self.pool, &entry.kept, &entry.dropped)
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
                queue::inserts_to_updates(self.pool, &entry.kept)
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
                log::info!(
                    "[download] Attendance {} will update server row {}",
                    entry.kept,
                    entry.dropped
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// The identity's rows of one table, in local shape
    async fn pull<R, T>(&self, table: SyncTable) -> Result<Vec<T>, CloudSyncError>
    where
        R: DeserializeOwned + Into<T>,
        T: Record,
    {
        let rows = self
            .backend
            .select_owned(table, &self.identity.user_id, &self.identity.access_token)
            .await?;

        let mut remote: Vec<T> = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<R>(row) {
                Ok(decoded) => remote.push(decoded.into()),
                Err(e) => log::warn!("[download] Skipping undecodable {} row: {}", table, e),
            }
        }

        // Downloaded rows carry server ids; map them to themselves so later
        // updates and deletes of these rows resolve their target.
        for record in &remote {
            id_map::record(self.pool, record.id(), record.id())
                .await
                .map_err(CloudSyncError::LocalDb)?;
        }
        Ok(remote)
    }

    /// Local rows worth keeping next to `remote`. Rows already uploaded (their id maps
    /// to a downloaded row) are left out and noted in `replaced`; the rest have their
    /// parent reference relinked.
    async fn local_rows<T>(
        &self,
        collection: Collection,
        remote: &[T],
        replaced: &mut Replaced,
    ) -> Result<Vec<T>, CloudSyncError>
    where
        T: Record + DeserializeOwned,
    {
        let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id()).collect();
        let mut kept = Vec::new();

        for mut record in collections::get::<T>(self.pool, collection).await {
            if !remote_ids.contains(record.id()) {
                let server_id = id_map::resolve(self.pool, record.id())
                    .await
                    .map_err(CloudSyncError::LocalDb)?;
                if let Some(server_id) = server_id.filter(|s| remote_ids.contains(s.as_str())) {
                    log::debug!("[download] {} is server row {}", record.id(), server_id);
                    replaced.insert(record.id().to_string(), server_id);
                    continue;
                }
            }
            relink(&mut record, replaced);
            kept.push(record);
        }
        Ok(kept)
    }
}

/// Convenience wrapper around [`Downloader::run`]
pub async fn download_and_merge<B: RemoteBackend + ?Sized>(
    pool: &SqlitePool,
    backend: &B,
    identity: &Identity,
) -> Result<DownloadStats, CloudSyncError> {
    Downloader::new(pool, backend, identity).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::local::{attendance, children, occurrences, points, routes};
    use crate::database::open_in_memory;
    use crate::database::remote::MemoryBackend;
    use crate::services::cloud_sync::SyncEngine;
    use crate::services::roster;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn identity() -> Identity {
        Identity {
            user_id: "user-1".into(),
            access_token: "token".into(),
        }
    }

    #[tokio::test]
    async fn local_only_rows_survive_the_merge() {
        let db = open_in_memory().await.unwrap();
        let local = routes::add_route(&db.0, "Local".into(), None).await;

        let backend = MemoryBackend::new();
        backend.seed(
            SyncTable::Routes,
            json!({"id": "srv-1", "user_id": "user-1", "name": "Remote", "created_at": "2024-05-01T10:00:00+00:00"}),
        );
        backend.seed(
            SyncTable::Routes,
            json!({"id": "srv-9", "user_id": "someone-else", "name": "Foreign"}),
        );

        let stats = download_and_merge(&db.0, &backend, &identity()).await.unwrap();
        assert_eq!(stats.routes, 1);
        assert!(stats.errors.is_empty());

        let ids: Vec<_> = routes::list_routes(&db.0)
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["srv-1".to_string(), local.id]);
        assert!(!state::needs_initial_sync(&db.0).await.unwrap());
        assert_eq!(
            id_map::resolve(&db.0, "srv-1").await.unwrap().as_deref(),
            Some("srv-1")
        );
    }

    #[tokio::test]
    async fn rerunning_is_idempotent() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        backend.seed(
            SyncTable::Routes,
            json!({"id": "srv-1", "user_id": "user-1", "name": "Norte"}),
        );
        backend.seed(
            SyncTable::Points,
            json!({"id": "srv-2", "user_id": "user-1", "route_id": "srv-1", "name": "Praça"}),
        );

        download_and_merge(&db.0, &backend, &identity()).await.unwrap();
        let first = collections::get::<Point>(&db.0, Collection::Points).await;
        download_and_merge(&db.0, &backend, &identity()).await.unwrap();
        let second = collections::get::<Point>(&db.0, Collection::Points).await;

        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].route_id, "srv-1");
    }

    #[tokio::test]
    async fn failing_collection_leaves_marker_unset() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        backend.seed(
            SyncTable::Routes,
            json!({"id": "srv-1", "user_id": "user-1", "name": "Norte"}),
        );
        backend.reject_table(SyncTable::Children);

        let stats = download_and_merge(&db.0, &backend, &identity()).await.unwrap();
        assert_eq!(stats.routes, 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(state::needs_initial_sync(&db.0).await.unwrap());
        // the collections that did come through are kept
        assert_eq!(routes::list_routes(&db.0).await.len(), 1);
    }

    #[tokio::test]
    async fn remote_attendance_supersedes_older_local_mark() {
        let db = open_in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        attendance::mark_attendance(&db.0, "srv-c", day, false).await;

        let backend = MemoryBackend::new();
        backend.seed(
            SyncTable::Attendance,
            json!({
                "id": "srv-a",
                "user_id": "user-1",
                "child_id": "srv-c",
                "date": "2024-05-06",
                "status": "present",
                "created_at": Utc::now().checked_add_signed(chrono::Duration::hours(1)).unwrap().to_rfc3339()
            }),
        );

        download_and_merge(&db.0, &backend, &identity()).await.unwrap();
        let records = attendance::attendance_by_child(&db.0, "srv-c").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "srv-a");
        assert!(records[0].present);
    }

    #[test]
    fn dedupe_keeps_latest_per_day() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let at = |h| Utc.with_ymd_and_hms(2024, 5, 6, h, 0, 0).unwrap();
        let record = |id: &str, h, present| Attendance {
            id: id.into(),
            child_id: "c".into(),
            date: day,
            present,
            timestamp: at(h),
        };

        let (kept, superseded) =
            dedupe_attendance(vec![record("a", 7, true), record("b", 9, false), record("c", 8, true)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "b");

        let dropped: Vec<(&str, &str)> = superseded
            .iter()
            .map(|s| (s.dropped.as_str(), s.kept.as_str()))
            .collect();
        assert_eq!(dropped, vec![("a", "b"), ("c", "b")]);
    }

    fn server_id(backend: &MemoryBackend, table: SyncTable) -> String {
        let rows = backend.rows(table);
        assert_eq!(rows.len(), 1);
        rows[0]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn uploaded_rows_are_not_duplicated_by_a_download() {
        let db = open_in_memory().await.unwrap();
        let pool = &db.0;
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let backend = MemoryBackend::new();
        let who = identity();

        let route = roster::create_route(pool, "Norte".into(), None).await.unwrap();
        let point = roster::create_point(pool, route.id.clone(), "Praça".into(), None)
            .await
            .unwrap();
        let child = roster::create_child(pool, point.id.clone(), "Ana".into(), None, None)
            .await
            .unwrap();
        roster::mark_attendance(pool, &child.id, day, true).await.unwrap();
        SyncEngine::new(pool, &backend, &who).drain().await.unwrap();

        // created after the upload, still under the local ids
        let late = children::add_child(pool, point.id.clone(), "Bia".into(), None, None).await;
        let note = occurrences::add_occurrence(pool, child.id.clone(), "Atraso".into(), None, day).await;

        download_and_merge(pool, &backend, &who).await.unwrap();

        let route_id = server_id(&backend, SyncTable::Routes);
        let point_id = server_id(&backend, SyncTable::Points);
        let child_id = server_id(&backend, SyncTable::Children);

        let local_routes = routes::list_routes(pool).await;
        assert_eq!(local_routes.len(), 1);
        assert_eq!(local_routes[0].id, route_id);

        let local_points = points::list_points(pool).await;
        assert_eq!(local_points.len(), 1);
        assert_eq!(local_points[0].route_id, route_id);

        let riders: Vec<String> = children::children_by_point(pool, &point_id)
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(riders, vec![child_id.clone(), late.id]);

        assert_eq!(attendance::list_attendance(pool).await.len(), 1);
        assert_eq!(attendance::attendance_by_child(pool, &child_id).await.len(), 1);

        let notes = occurrences::list_occurrences(pool).await;
        assert_eq!(notes[0].id, note.id);
        assert_eq!(notes[0].child_id, child_id);
    }

    fn seed_rider(backend: &MemoryBackend) {
        backend.seed(SyncTable::Routes, json!({"id": "srv-r", "user_id": "user-1", "name": "Norte"}));
        backend.seed(
            SyncTable::Points,
            json!({"id": "srv-p", "user_id": "user-1", "route_id": "srv-r", "name": "Praça"}),
        );
        backend.seed(
            SyncTable::Children,
            json!({"id": "srv-c", "user_id": "user-1", "point_id": "srv-p", "name": "Ana"}),
        );
    }

    fn marks_for(backend: &MemoryBackend, child_id: &str) -> Vec<String> {
        backend
            .rows(SyncTable::Attendance)
            .iter()
            .filter(|r| r["child_id"] == child_id)
            .map(|r| r["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn newer_server_mark_cancels_the_queued_local_one() {
        let db = open_in_memory().await.unwrap();
        let pool = &db.0;
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let backend = MemoryBackend::new();
        seed_rider(&backend);
        backend.seed(
            SyncTable::Attendance,
            json!({
                "id": "srv-a",
                "user_id": "user-1",
                "child_id": "srv-c",
                "date": "2024-05-06",
                "status": "present",
                "created_at": Utc::now().checked_add_signed(chrono::Duration::hours(1)).unwrap().to_rfc3339()
            }),
        );
        roster::mark_attendance(pool, "srv-c", day, false).await.unwrap();
        let who = identity();

        download_and_merge(pool, &backend, &who).await.unwrap();
        assert_eq!(queue::depth(pool).await.unwrap(), 0);

        SyncEngine::new(pool, &backend, &who).drain().await.unwrap();
        assert_eq!(marks_for(&backend, "srv-c"), vec!["present"]);

        let local = attendance::attendance_by_child(pool, "srv-c").await;
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, "srv-a");
    }

    #[tokio::test]
    async fn newer_local_mark_updates_the_server_row() {
        let db = open_in_memory().await.unwrap();
        let pool = &db.0;
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let backend = MemoryBackend::new();
        seed_rider(&backend);
        backend.seed(
            SyncTable::Attendance,
            json!({
                "id": "srv-a",
                "user_id": "user-1",
                "child_id": "srv-c",
                "date": "2024-05-06",
                "status": "present",
                "created_at": "2024-05-06T07:00:00+00:00"
            }),
        );
        let marked = roster::mark_attendance(pool, "srv-c", day, false).await.unwrap();
        let who = identity();

        download_and_merge(pool, &backend, &who).await.unwrap();
        let pending = queue::peek_all(pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op_type, crate::models::sync::OperationType::Update);

        let counts = SyncEngine::new(pool, &backend, &who).drain().await.unwrap();
        assert_eq!((counts.success, counts.failed), (1, 0));
        assert_eq!(marks_for(&backend, "srv-c"), vec!["absent"]);

        let local = attendance::attendance_by_child(pool, "srv-c").await;
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, marked.record().id);
    }
}
