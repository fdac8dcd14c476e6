//! Queue drain: replays pending local mutations against the backend
//!
//! For each queued operation:
//! 1. Translates parent references (route/point/child) to server ids via the id map
//! 2. Resolves the target server row for update/delete
//! 3. Shapes the wire row and calls the backend
//! 4. Records new server ids, removes applied operations, counts failed attempts

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::database::local::queue::{self, FailureOutcome};
use crate::database::local::{children, id_map, points, state};
use crate::database::remote::payload::{build_request, ResolvedRefs, WriteRequest};
use crate::database::remote::{RemoteBackend, SyncError};
use crate::models::sync::{
    EntityPayload, Identity, OperationType, SyncCounts, SyncOperation, SyncTable,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CloudSyncError {
    /// Error from local database operation
    #[error("Local DB error: {0}")]
    LocalDb(String),
    /// Error from remote Supabase operation
    #[error("Remote sync error: {0}")]
    Remote(#[from] SyncError),
    /// Update/delete target has no known server id
    #[error("{table} with id {local_id} has not been synced yet")]
    NotSynced { table: SyncTable, local_id: String },
}

// ============================================================================
// Drain Order
// ============================================================================

/// Reorder a queue snapshot so a pending parent insert runs before anything that
/// references it. Otherwise the snapshot keeps its FIFO order.
pub fn drain_order(snapshot: Vec<SyncOperation>) -> Vec<SyncOperation> {
    let order = {
        let mut inserts: HashMap<&str, usize> = HashMap::new();
        for (index, op) in snapshot.iter().enumerate() {
            if op.op_type == OperationType::Insert {
                inserts.entry(op.local_id.as_str()).or_insert(index);
            }
        }

        let mut placed = vec![false; snapshot.len()];
        let mut order = Vec::with_capacity(snapshot.len());
        for index in 0..snapshot.len() {
            place(index, &snapshot, &inserts, &mut placed, &mut order);
        }
        order
    };

    let mut slots: Vec<Option<SyncOperation>> = snapshot.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

fn place(
    index: usize,
    snapshot: &[SyncOperation],
    inserts: &HashMap<&str, usize>,
    placed: &mut [bool],
    order: &mut Vec<usize>,
) {
    if placed[index] {
        return;
    }
    placed[index] = true;

    if let Some(parent) = snapshot[index].data.parent_id() {
        if let Some(&parent_index) = inserts.get(parent) {
            place(parent_index, snapshot, inserts, placed, order);
        }
    }
    order.push(index);
}

// ============================================================================
// Sync Engine
// ============================================================================

/// A remote write that went through
enum Applied {
    Written,
    Inserted { server_id: String },
}

/// Drains the operation queue for one identity
pub struct SyncEngine<'a, B: RemoteBackend + ?Sized> {
    pub pool: &'a SqlitePool,
    pub backend: &'a B,
    pub identity: &'a Identity,
}

impl<'a, B: RemoteBackend + ?Sized> SyncEngine<'a, B> {
    pub fn new(pool: &'a SqlitePool, backend: &'a B, identity: &'a Identity) -> Self {
        Self {
            pool,
            backend,
            identity,
        }
    }

    /// One pass over the operations queued when the pass starts.
    ///
    /// Applied operations leave the queue; failed ones have their retry counter bumped
    /// (and are dropped at the limit). Operations enqueued mid-pass wait for the next one.
    pub async fn drain(&self) -> Result<SyncCounts, CloudSyncError> {
        let snapshot = queue::peek_all(self.pool)
            .await
            .map_err(CloudSyncError::LocalDb)?;

        let mut counts = SyncCounts::default();
        if snapshot.is_empty() {
            return Ok(counts);
        }
        log::info!("[sync] Draining {} queued operations", snapshot.len());

        for op in drain_order(snapshot) {
            match self.apply(&op).await {
                Ok(applied) => {
                    // The server row exists now. Failing to remember it must stop the
                    // pass rather than count as a retry, or the insert would be sent twice.
                    if let Applied::Inserted { server_id } = applied {
                        id_map::record(self.pool, &op.local_id, &server_id)
                            .await
                            .map_err(CloudSyncError::LocalDb)?;
                        log::debug!("[sync] {} {} -> {}", op.table, op.local_id, server_id);
                    }
                    queue::remove(self.pool, &op.id)
                        .await
                        .map_err(CloudSyncError::LocalDb)?;
                    counts.success += 1;
                }
                Err(e) => {
                    log::warn!(
                        "[sync] {} {} {} failed: {}",
                        op.op_type.as_str(),
                        op.table,
                        op.local_id,
                        e
                    );
                    counts.failed += 1;
                    let outcome = queue::record_failure(self.pool, &op.id)
                        .await
                        .map_err(CloudSyncError::LocalDb)?;
                    if outcome == FailureOutcome::Dropped {
                        counts.dropped += 1;
                    }
                }
            }
        }

        if counts.success > 0 {
            state::set_last_synced_at(self.pool, Utc::now())
                .await
                .map_err(CloudSyncError::LocalDb)?;
        }

        log::info!("[sync] Pass finished: {}", counts.summary());
        Ok(counts)
    }

    async fn apply(&self, op: &SyncOperation) -> Result<Applied, CloudSyncError> {
        let refs = self.resolve_refs(&op.data).await?;
        let target = match op.op_type {
            OperationType::Insert => None,
            OperationType::Update | OperationType::Delete => self.resolve_target(op).await?,
        };

        let request = build_request(op.op_type, &op.data, &refs, &self.identity.user_id, target)
            .ok_or_else(|| CloudSyncError::NotSynced {
                table: op.table,
                local_id: op.local_id.clone(),
            })?;

        let token = self.identity.access_token.as_str();
        let applied = match request {
            WriteRequest::Insert { table, row } => Applied::Inserted {
                server_id: self.backend.insert(table, &row, token).await?,
            },
            WriteRequest::Update {
                table,
                server_id,
                row,
            } => {
                self.backend.update(table, &server_id, &row, token).await?;
                Applied::Written
            }
            WriteRequest::Delete { table, server_id } => {
                self.backend.delete(table, &server_id, token).await?;
                Applied::Written
            }
        };
        Ok(applied)
    }

    /// Server ids for the references the payload carries
    async fn resolve_refs(&self, payload: &EntityPayload) -> Result<ResolvedRefs, CloudSyncError> {
        let parent = match payload.parent_id() {
            Some(local) => id_map::resolve(self.pool, local)
                .await
                .map_err(CloudSyncError::LocalDb)?,
            None => None,
        };

        let route = match payload {
            EntityPayload::Attendance(attendance) => {
                self.attendance_route(&attendance.child_id).await?
            }
            _ => None,
        };

        Ok(ResolvedRefs { parent, route })
    }

    /// child -> point -> route, translated. `None` when any link is missing.
    async fn attendance_route(&self, child_id: &str) -> Result<Option<String>, CloudSyncError> {
        let Some(child) = children::get_child(self.pool, child_id).await else {
            return Ok(None);
        };
        let Some(point) = points::get_point(self.pool, &child.point_id).await else {
            return Ok(None);
        };
        id_map::resolve(self.pool, &point.route_id)
            .await
            .map_err(CloudSyncError::LocalDb)
    }

    /// Server row an update/delete applies to
    async fn resolve_target(&self, op: &SyncOperation) -> Result<Option<String>, CloudSyncError> {
        if let Some(server_id) = id_map::resolve(self.pool, &op.local_id)
            .await
            .map_err(CloudSyncError::LocalDb)?
        {
            return Ok(Some(server_id));
        }

        let payload_id = op.data.id();
        let known = id_map::is_server_id(self.pool, payload_id)
            .await
            .map_err(CloudSyncError::LocalDb)?;
        Ok(known.then(|| payload_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::local::routes;
    use crate::database::open_in_memory;
    use crate::database::remote::memory::RecordedCall;
    use crate::database::remote::MemoryBackend;
    use crate::models::roster::{Point, Route};
    use chrono::Utc;

    fn identity() -> Identity {
        Identity {
            user_id: "user-1".into(),
            access_token: "token".into(),
        }
    }

    fn route(id: &str, name: &str) -> Route {
        Route {
            id: id.into(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    fn point(id: &str, route_id: &str) -> Point {
        Point {
            id: id.into(),
            route_id: route_id.into(),
            name: "Praça".into(),
            address: None,
            created_at: Utc::now(),
        }
    }

    fn op(op_type: OperationType, data: EntityPayload) -> SyncOperation {
        SyncOperation {
            id: format!("op-{}", data.id()),
            op_type,
            table: data.table(),
            local_id: data.id().to_string(),
            data,
            timestamp: 0,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn drains_in_order_and_second_pass_is_empty() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        let who = identity();

        for (id, name) in [("r-a", "A"), ("r-b", "B"), ("r-c", "C")] {
            queue::enqueue(&db.0, OperationType::Insert, route(id, name).into(), id)
                .await
                .unwrap();
        }

        let engine = SyncEngine::new(&db.0, &backend, &who);
        let counts = engine.drain().await.unwrap();
        assert_eq!((counts.success, counts.failed), (3, 0));
        assert_eq!(queue::depth(&db.0).await.unwrap(), 0);

        let names: Vec<_> = backend
            .rows(SyncTable::Routes)
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["A", "B", "C"]);
        assert!(state::last_synced_at(&db.0).await.unwrap().is_some());

        assert_eq!(engine.drain().await.unwrap(), SyncCounts::default());
    }

    #[tokio::test]
    async fn failing_operation_is_dropped_after_three_attempts() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        backend.reject_table(SyncTable::Routes);
        let who = identity();

        queue::enqueue(&db.0, OperationType::Insert, route("r-1", "A").into(), "r-1")
            .await
            .unwrap();

        let engine = SyncEngine::new(&db.0, &backend, &who);
        for pass in 1..=3 {
            let counts = engine.drain().await.unwrap();
            assert_eq!(counts.failed, 1);
            assert_eq!(counts.dropped, usize::from(pass == 3));
        }
        assert_eq!(backend.writes().len(), 3);

        assert_eq!(engine.drain().await.unwrap(), SyncCounts::default());
        assert_eq!(backend.writes().len(), 3);
        assert_eq!(state::dropped_operations(&db.0).await.unwrap(), 1);
        // nothing succeeded, so no sync marker
        assert_eq!(state::last_synced_at(&db.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn point_is_sent_with_the_routes_server_id() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        let who = identity();
        let engine = SyncEngine::new(&db.0, &backend, &who);

        let r = routes::add_route(&db.0, "Norte".into(), None).await;
        queue::enqueue(&db.0, OperationType::Insert, r.clone().into(), &r.id)
            .await
            .unwrap();
        engine.drain().await.unwrap();
        let server_route = id_map::resolve(&db.0, &r.id).await.unwrap().unwrap();

        queue::enqueue(&db.0, OperationType::Insert, point("p-1", &r.id).into(), "p-1")
            .await
            .unwrap();
        let counts = engine.drain().await.unwrap();
        assert_eq!(counts.success, 1);

        let sent = backend.rows(SyncTable::Points);
        assert_eq!(sent[0]["route_id"], server_route.as_str());
        assert_eq!(sent[0]["user_id"], "user-1");
    }

    #[tokio::test]
    async fn update_without_server_id_fails_without_calling_backend() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        let who = identity();

        queue::enqueue(&db.0, OperationType::Update, route("r-x", "X").into(), "r-x")
            .await
            .unwrap();

        let counts = SyncEngine::new(&db.0, &backend, &who).drain().await.unwrap();
        assert_eq!((counts.success, counts.failed), (0, 1));
        assert!(backend.calls().is_empty());
        assert_eq!(queue::depth(&db.0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_targets_the_mapped_server_row() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        let who = identity();
        let engine = SyncEngine::new(&db.0, &backend, &who);

        queue::enqueue(&db.0, OperationType::Insert, route("r-1", "A").into(), "r-1")
            .await
            .unwrap();
        queue::enqueue(&db.0, OperationType::Delete, route("r-1", "A").into(), "r-1")
            .await
            .unwrap();

        let counts = engine.drain().await.unwrap();
        assert_eq!(counts.success, 2);
        assert!(backend.rows(SyncTable::Routes).is_empty());
        assert!(matches!(
            backend.writes().last(),
            Some(RecordedCall::Delete { id, .. }) if id == "srv-1"
        ));
    }

    #[tokio::test]
    async fn unrecorded_server_id_stops_the_pass_without_a_retry() {
        let db = open_in_memory().await.unwrap();
        let backend = MemoryBackend::new();
        let who = identity();

        queue::enqueue(&db.0, OperationType::Insert, route("r-1", "A").into(), "r-1")
            .await
            .unwrap();
        queue::enqueue(&db.0, OperationType::Insert, route("r-2", "B").into(), "r-2")
            .await
            .unwrap();
        sqlx::query("DROP TABLE id_map").execute(&db.0).await.unwrap();

        let result = SyncEngine::new(&db.0, &backend, &who).drain().await;
        assert!(matches!(result, Err(CloudSyncError::LocalDb(_))));

        // the first insert reached the server; nothing after it was attempted
        assert_eq!(backend.writes().len(), 1);
        let pending = queue::peek_all(&db.0).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|op| op.retries == 0));
    }

    #[test]
    fn parent_insert_is_hoisted_ahead_of_its_dependent() {
        let snapshot = vec![
            op(OperationType::Insert, point("p-1", "r-1").into()),
            op(OperationType::Insert, route("r-0", "Z").into()),
            op(OperationType::Insert, route("r-1", "A").into()),
        ];

        let ids: Vec<_> = drain_order(snapshot)
            .into_iter()
            .map(|o| o.local_id)
            .collect();
        assert_eq!(ids, ["r-1", "p-1", "r-0"]);
    }

    #[test]
    fn unrelated_operations_keep_fifo_order() {
        let snapshot = vec![
            op(OperationType::Insert, route("r-1", "A").into()),
            op(OperationType::Update, route("r-2", "B").into()),
            op(OperationType::Insert, point("p-1", "r-1").into()),
        ];

        let ids: Vec<_> = drain_order(snapshot)
            .into_iter()
            .map(|o| o.local_id)
            .collect();
        assert_eq!(ids, ["r-1", "r-2", "p-1"]);
    }
}
