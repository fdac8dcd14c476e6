pub mod cloud_sync;
pub mod coordinator;
pub mod download;
pub mod reports;
pub mod roster;

pub use cloud_sync::{CloudSyncError, SyncEngine};
pub use coordinator::SyncCoordinator;
pub use download::{download_and_merge, DownloadStats};
