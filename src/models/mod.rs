pub mod attendance;
pub mod roster;
pub mod sync;

/// Anything stored in a collection under a stable string id
pub trait Record {
    fn id(&self) -> &str;

    /// The id of the record this one hangs off, for relinking after a download
    fn parent_mut(&mut self) -> Option<&mut String> {
        None
    }
}
