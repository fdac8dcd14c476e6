use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

use super::attendance::Attendance;
use super::roster::{Child, Point, Route};

/// Attempts allowed before a queued operation is dropped
pub const MAX_RETRIES: i64 = 3;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(OperationType::Insert),
            "update" => Some(OperationType::Update),
            "delete" => Some(OperationType::Delete),
            _ => None,
        }
    }
}

/// Remote tables that take part in sync. Declared parent-first.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncTable {
    Routes,
    Points,
    Children,
    Attendance,
}

impl SyncTable {
    pub const ALL: [SyncTable; 4] = [
        SyncTable::Routes,
        SyncTable::Points,
        SyncTable::Children,
        SyncTable::Attendance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::Routes => "routes",
            SyncTable::Points => "points",
            SyncTable::Children => "children",
            SyncTable::Attendance => "attendance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        SyncTable::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the entity at the time it was mutated locally
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum EntityPayload {
    Route(Route),
    Point(Point),
    Child(Child),
    Attendance(Attendance),
}

impl EntityPayload {
    pub fn table(&self) -> SyncTable {
        match self {
            EntityPayload::Route(_) => SyncTable::Routes,
            EntityPayload::Point(_) => SyncTable::Points,
            EntityPayload::Child(_) => SyncTable::Children,
            EntityPayload::Attendance(_) => SyncTable::Attendance,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityPayload::Route(r) => &r.id,
            EntityPayload::Point(p) => &p.id,
            EntityPayload::Child(c) => &c.id,
            EntityPayload::Attendance(a) => &a.id,
        }
    }

    /// Local id of the parent this entity references, if any
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            EntityPayload::Route(_) => None,
            EntityPayload::Point(p) => Some(&p.route_id),
            EntityPayload::Child(c) => Some(&c.point_id),
            EntityPayload::Attendance(a) => Some(&a.child_id),
        }
    }
}

impl From<Route> for EntityPayload {
    fn from(value: Route) -> Self {
        EntityPayload::Route(value)
    }
}

impl From<Point> for EntityPayload {
    fn from(value: Point) -> Self {
        EntityPayload::Point(value)
    }
}

impl From<Child> for EntityPayload {
    fn from(value: Child) -> Self {
        EntityPayload::Child(value)
    }
}

impl From<Attendance> for EntityPayload {
    fn from(value: Attendance) -> Self {
        EntityPayload::Attendance(value)
    }
}

/// A queued local mutation awaiting remote application
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub table: SyncTable,
    pub data: EntityPayload,
    pub local_id: String,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
    pub retries: i64,
}

/// Authenticated identity the sync core acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub access_token: String,
}

/// Aggregate outcome of one or more drain passes
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub success: usize,
    pub failed: usize,
    /// Failures that exhausted their retries and left the queue
    pub dropped: usize,
}

impl SyncCounts {
    pub fn summary(&self) -> String {
        if self.failed == 0 {
            format!("{} sent", self.success)
        } else {
            format!("{} sent, {} failed", self.success, self.failed)
        }
    }
}

impl AddAssign for SyncCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.success += rhs.success;
        self.failed += rhs.failed;
        self.dropped += rhs.dropped;
    }
}

/// What the status surface shows
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Syncing,
    Success,
    Error,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Syncing => "syncing",
            SyncPhase::Success => "success",
            SyncPhase::Error => "error",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub signed_in: bool,
    pub phase: SyncPhase,
    pub pending: i64,
    pub dropped: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}
