//! Sync status surface
//!
//! Owns the decision of when the drain and download engines run, and makes sure
//! they never overlap. A trigger that arrives while a pass is in flight is not
//! lost: it leaves a pending flag behind and the running pass performs one more
//! round before releasing the gate.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::cloud_sync::{CloudSyncError, SyncEngine};
use super::download::{DownloadStats, Downloader};
use crate::database::local::{queue, state};
use crate::database::remote::RemoteBackend;
use crate::models::sync::{Identity, SyncCounts, SyncPhase, SyncStatus};

struct Signals {
    online: bool,
    identity: Option<Identity>,
    phase: SyncPhase,
    message: Option<String>,
}

/// What one runner did while it held the gate
#[derive(Debug, Default)]
struct RunOutcome {
    counts: SyncCounts,
    drained: bool,
    download: Option<DownloadStats>,
}

pub struct SyncCoordinator<B: RemoteBackend> {
    pool: SqlitePool,
    backend: B,
    gate: tokio::sync::Mutex<()>,
    pending_drain: AtomicBool,
    pending_download: AtomicBool,
    signals: Mutex<Signals>,
}

impl<B: RemoteBackend> SyncCoordinator<B> {
    pub fn new(pool: SqlitePool, backend: B) -> Self {
        Self {
            pool,
            backend,
            gate: tokio::sync::Mutex::new(()),
            pending_drain: AtomicBool::new(false),
            pending_download: AtomicBool::new(false),
            signals: Mutex::new(Signals {
                online: true,
                identity: None,
                phase: SyncPhase::Idle,
                message: None,
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn signals(&self) -> MutexGuard<'_, Signals> {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: SyncPhase, message: Option<String>) {
        let mut signals = self.signals();
        signals.phase = phase;
        signals.message = message;
    }

    /// Returns true when this call brings the surface back online
    pub fn set_online(&self, online: bool) -> bool {
        let mut signals = self.signals();
        let reconnected = online && !signals.online;
        signals.online = online;
        if reconnected {
            log::info!("[coordinator] Back online");
        }
        reconnected
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        self.signals().identity = identity;
    }

    pub async fn get_queue_depth(&self) -> Result<i64, CloudSyncError> {
        queue::depth(&self.pool).await.map_err(CloudSyncError::LocalDb)
    }

    pub async fn needs_initial_sync(&self) -> Result<bool, CloudSyncError> {
        state::needs_initial_sync(&self.pool)
            .await
            .map_err(CloudSyncError::LocalDb)
    }

    pub async fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, CloudSyncError> {
        state::last_synced_at(&self.pool)
            .await
            .map_err(CloudSyncError::LocalDb)
    }

    pub async fn status(&self) -> Result<SyncStatus, CloudSyncError> {
        let pending = self.get_queue_depth().await?;
        let dropped = state::dropped_operations(&self.pool)
            .await
            .map_err(CloudSyncError::LocalDb)?;
        let last_synced_at = self.last_synced_at().await?;

        let signals = self.signals();
        Ok(SyncStatus {
            online: signals.online,
            signed_in: signals.identity.is_some(),
            phase: signals.phase,
            pending,
            dropped,
            last_synced_at,
            message: signals.message.clone(),
        })
    }

    /// Drain the queue. `None` when another pass is already running; that pass
    /// picks up this request before it finishes.
    pub async fn trigger_sync(
        &self,
        identity: &Identity,
    ) -> Result<Option<SyncCounts>, CloudSyncError> {
        self.pending_drain.store(true, Ordering::SeqCst);
        let Ok(guard) = self.gate.try_lock() else {
            log::debug!("[coordinator] Pass in flight, sync request coalesced");
            return Ok(None);
        };

        let outcome = self.run(identity, guard).await?;
        Ok(Some(outcome.counts))
    }

    /// Pull server state until one download has come through complete. `None` when the
    /// download was not needed or was handed to a pass already in flight.
    pub async fn trigger_initial_download(
        &self,
        identity: &Identity,
    ) -> Result<Option<DownloadStats>, CloudSyncError> {
        if !self.needs_initial_sync().await? {
            return Ok(None);
        }

        self.pending_download.store(true, Ordering::SeqCst);
        let Ok(guard) = self.gate.try_lock() else {
            log::debug!("[coordinator] Pass in flight, download request coalesced");
            return Ok(None);
        };

        let outcome = self.run(identity, guard).await?;
        Ok(outcome.download)
    }

    /// React to the current signals: download on the first signed-in run, then
    /// drain whatever is queued. Does nothing while offline or signed out.
    pub async fn tick(&self) -> Result<Option<SyncCounts>, CloudSyncError> {
        let identity = {
            let signals = self.signals();
            if !signals.online {
                return Ok(None);
            }
            match &signals.identity {
                Some(identity) => identity.clone(),
                None => return Ok(None),
            }
        };

        self.trigger_initial_download(&identity).await?;
        if self.get_queue_depth().await? == 0 {
            return Ok(None);
        }
        self.trigger_sync(&identity).await
    }

    /// Called when connectivity returns
    pub async fn on_reconnect(&self) -> Result<Option<SyncCounts>, CloudSyncError> {
        self.set_online(true);
        self.tick().await
    }

    /// Runs pending work until none is left, releasing the gate only when both
    /// flags are clear.
    async fn run(
        &self,
        identity: &Identity,
        mut guard: tokio::sync::MutexGuard<'_, ()>,
    ) -> Result<RunOutcome, CloudSyncError> {
        let mut outcome = RunOutcome::default();

        loop {
            if let Err(e) = self.run_pending(identity, &mut outcome).await {
                self.set_phase(SyncPhase::Error, Some(e.to_string()));
                return Err(e);
            }
            drop(guard);

            let more = self.pending_drain.load(Ordering::SeqCst)
                || self.pending_download.load(Ordering::SeqCst);
            if !more {
                break;
            }
            match self.gate.try_lock() {
                Ok(next) => guard = next,
                // whoever holds it now will see the flags
                Err(_) => break,
            }
        }

        self.finish(&outcome);
        Ok(outcome)
    }

    async fn run_pending(
        &self,
        identity: &Identity,
        outcome: &mut RunOutcome,
    ) -> Result<(), CloudSyncError> {
        loop {
            if self.pending_download.swap(false, Ordering::SeqCst) && self.needs_initial_sync().await? {
                self.set_phase(SyncPhase::Syncing, Some("Downloading".to_string()));
                let stats = Downloader::new(&self.pool, &self.backend, identity).run().await?;
                outcome.download = Some(stats);
                continue;
            }

            if self.pending_drain.swap(false, Ordering::SeqCst) {
                self.set_phase(SyncPhase::Syncing, Some("Sending changes".to_string()));
                let counts = SyncEngine::new(&self.pool, &self.backend, identity)
                    .drain()
                    .await?;
                outcome.counts += counts;
                outcome.drained = true;
                continue;
            }

            return Ok(());
        }
    }

    fn finish(&self, outcome: &RunOutcome) {
        let counts = outcome.counts;
        let mut messages = Vec::new();
        let mut failed = counts.failed > 0;

        if let Some(stats) = &outcome.download {
            messages.push(stats.summary());
            failed |= !stats.errors.is_empty();
        }
        if outcome.drained && counts.success + counts.failed > 0 {
            messages.push(counts.summary());
        }

        if messages.is_empty() {
            self.set_phase(SyncPhase::Idle, None);
            return;
        }
        let phase = if failed {
            SyncPhase::Error
        } else {
            SyncPhase::Success
        };
        self.set_phase(phase, Some(messages.join("; ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_in_memory;
    use crate::database::remote::MemoryBackend;
    use crate::models::sync::SyncTable;
    use crate::services::roster;
    use serde_json::json;

    fn identity() -> Identity {
        Identity {
            user_id: "user-1".into(),
            access_token: "token".into(),
        }
    }

    async fn coordinator() -> SyncCoordinator<MemoryBackend> {
        let db = open_in_memory().await.unwrap();
        SyncCoordinator::new(db.0, MemoryBackend::new())
    }

    #[tokio::test]
    async fn tick_does_nothing_offline_or_signed_out() {
        let sync = coordinator().await;
        roster::create_route(&sync.pool, "Norte".into(), None).await.unwrap();

        assert_eq!(sync.tick().await.unwrap(), None);
        sync.set_identity(Some(identity()));
        sync.set_online(false);
        assert_eq!(sync.tick().await.unwrap(), None);

        assert!(sync.backend().calls().is_empty());
        assert_eq!(sync.get_queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reconnect_downloads_once_then_drains() {
        let sync = coordinator().await;
        sync.backend().seed(
            SyncTable::Routes,
            json!({"id": "srv-100", "user_id": "user-1", "name": "Remote"}),
        );
        roster::create_route(&sync.pool, "Local".into(), None).await.unwrap();
        sync.set_identity(Some(identity()));
        sync.set_online(false);

        let counts = sync.on_reconnect().await.unwrap().unwrap();
        assert_eq!(counts.success, 1);
        assert!(!sync.needs_initial_sync().await.unwrap());

        let status = sync.status().await.unwrap();
        assert_eq!(status.phase, SyncPhase::Success);
        assert_eq!(status.pending, 0);
        assert!(status.signed_in && status.online);

        // marker exists now, so no second download
        assert_eq!(sync.trigger_initial_download(&identity()).await.unwrap(), None);
        let selects = sync
            .backend()
            .calls()
            .iter()
            .filter(|c| !c.is_write())
            .count();
        assert_eq!(selects, SyncTable::ALL.len());
    }

    #[tokio::test]
    async fn partial_download_is_retried_even_after_a_drain() {
        let sync = coordinator().await;
        sync.backend().seed(
            SyncTable::Routes,
            json!({"id": "srv-r", "user_id": "user-1", "name": "Norte"}),
        );
        sync.backend().seed(
            SyncTable::Points,
            json!({"id": "srv-p", "user_id": "user-1", "route_id": "srv-r", "name": "Praça"}),
        );
        sync.backend().seed(
            SyncTable::Children,
            json!({"id": "srv-c", "user_id": "user-1", "point_id": "srv-p", "name": "Ana"}),
        );
        sync.backend().reject_table(SyncTable::Children);
        roster::create_route(&sync.pool, "Local".into(), None).await.unwrap();
        sync.set_identity(Some(identity()));

        let counts = sync.tick().await.unwrap().unwrap();
        assert_eq!(counts.success, 1);
        assert!(sync.last_synced_at().await.unwrap().is_some());
        assert!(sync.needs_initial_sync().await.unwrap());

        sync.backend().accept_table(SyncTable::Children);
        assert_eq!(sync.tick().await.unwrap(), None);

        assert!(!sync.needs_initial_sync().await.unwrap());
        let riders = crate::database::local::children::list_children(&sync.pool).await;
        assert_eq!(riders.len(), 1);
        assert_eq!(riders[0].id, "srv-c");
    }

    #[tokio::test]
    async fn failures_show_in_status() {
        let sync = coordinator().await;
        sync.backend().reject_table(SyncTable::Routes);
        roster::create_route(&sync.pool, "Norte".into(), None).await.unwrap();

        let counts = sync.trigger_sync(&identity()).await.unwrap().unwrap();
        assert_eq!(counts.failed, 1);

        let status = sync.status().await.unwrap();
        assert_eq!(status.phase, SyncPhase::Error);
        assert_eq!(status.message.as_deref(), Some("0 sent, 1 failed"));
        assert_eq!(status.pending, 1);
    }
}
