pub mod attendance;
pub mod children;
pub mod collections;
pub mod database;
pub mod id_map;
pub mod occurrences;
pub mod points;
pub mod queue;
pub mod routes;
pub mod state;

pub use database::{init_app_db, open_in_memory, Db};
