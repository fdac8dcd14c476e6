pub mod config;
pub mod database;
pub mod models;
pub mod services;

use crate::config::Settings;
use crate::database::remote::{SupabaseClient, SyncError};
use crate::database::Db;
use crate::services::SyncCoordinator;

/// Open (creating and migrating if needed) the local store named by the settings
pub async fn open_store(settings: &Settings) -> Result<Db, String> {
    database::init_app_db(&settings.database_path()).await
}

/// Backend client for the configured project, if one is configured
pub fn connect_backend(settings: &Settings) -> Option<Result<SupabaseClient, SyncError>> {
    let backend = settings.backend.as_ref()?;
    Some(SupabaseClient::new(
        backend.url.clone(),
        backend.anon_key.clone(),
        backend.timeout(),
    ))
}

/// Store plus backend, wired into a coordinator that knows the configured identity
pub fn coordinator(db: &Db, client: SupabaseClient, settings: &Settings) -> SyncCoordinator<SupabaseClient> {
    let coordinator = SyncCoordinator::new(db.0.clone(), client);
    coordinator.set_identity(settings.identity());
    coordinator
}
