// Remote database operations for Supabase cloud sync
//
// All operations use the Supabase REST API (PostgREST), behind the
// `RemoteBackend` trait so the sync engines can run against `MemoryBackend`.
//
// Key concepts:
// - local records keep their locally generated ids; the server assigns its own
// - the id_map table (database/local/id_map.rs) translates between the two
// - every row carries `user_id`, download filters on it
//
// Sync order (respecting foreign key dependencies):
// 1. routes
// 2. points (depends on routes)
// 3. children (depends on points)
// 4. attendance (depends on children, optionally routes)

pub mod common;
pub mod memory;
pub mod payload;
pub mod rows;

pub use common::{RemoteBackend, SupabaseClient, SyncError};
pub use memory::MemoryBackend;
