pub mod local;
pub mod remote;

pub use local::{init_app_db, open_in_memory, Db};
