use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;

/// Handle to the local durable store. Cloning shares the same pool.
#[derive(Clone, Debug)]
pub struct Db(pub SqlitePool);

/*
 * Opens (creating if needed) the roster database at `db_path`,
 * which holds the entity collections, the sync queue and the id map.
 */
pub async fn init_app_db(db_path: &Path) -> Result<Db, String> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create data dir {}: {}",
                parent.display(),
                e
            )
        })?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            format!(
                "Failed to connect to database at {}: {}",
                db_path.display(),
                e
            )
        })?;

    migrate(&pool).await?;
    Ok(Db(pool))
}

/// Private in-memory database, used by tests and dry runs.
/// A single never-recycled connection keeps the data alive for the pool's lifetime.
pub async fn open_in_memory() -> Result<Db, String> {
    let connect_options = SqliteConnectOptions::new().in_memory(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await
        .map_err(|e| format!("Failed to open in-memory database: {}", e))?;

    migrate(&pool).await?;
    Ok(Db(pool))
}

async fn migrate(pool: &SqlitePool) -> Result<(), String> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| format!("Failed to run app migrations: {}", e))
}
