// Entity -> wire shape mapping for the remote tables
//
// The backend stores flat snake_case rows owned by `user_id`. Foreign keys must
// already be translated to server ids by the caller (see services/cloud_sync.rs);
// these functions only reshape.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::attendance::Attendance;
use crate::models::roster::{Child, Point, Route};
use crate::models::sync::{EntityPayload, OperationType, SyncTable};

/// Attendance presence as the backend spells it
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl From<bool> for AttendanceStatus {
    fn from(present: bool) -> Self {
        if present {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Absent
        }
    }
}

/// Row body for insert/update
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct WireRow {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
}

/// Server-side ids for the references an entity carries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRefs {
    /// Translated routeId / pointId / childId (whichever the entity has)
    pub parent: Option<String>,
    /// Route of an attendance record, found through child -> point -> route
    pub route: Option<String>,
}

/// A fully shaped remote write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Insert {
        table: SyncTable,
        row: WireRow,
    },
    Update {
        table: SyncTable,
        server_id: String,
        row: WireRow,
    },
    Delete {
        table: SyncTable,
        server_id: String,
    },
}

pub fn route_row(route: &Route, user_id: &str) -> WireRow {
    WireRow {
        user_id: user_id.to_string(),
        name: Some(route.name.clone()),
        ..Default::default()
    }
}

pub fn point_row(point: &Point, route_id: &str, user_id: &str) -> WireRow {
    WireRow {
        user_id: user_id.to_string(),
        name: Some(point.name.clone()),
        route_id: Some(route_id.to_string()),
        ..Default::default()
    }
}

pub fn child_row(child: &Child, point_id: &str, user_id: &str) -> WireRow {
    WireRow {
        user_id: user_id.to_string(),
        name: Some(child.name.clone()),
        point_id: Some(point_id.to_string()),
        ..Default::default()
    }
}

/// `route_id` is optional: sent only when the child's route could be resolved
pub fn attendance_row(
    attendance: &Attendance,
    child_id: &str,
    route_id: Option<&str>,
    user_id: &str,
) -> WireRow {
    WireRow {
        user_id: user_id.to_string(),
        child_id: Some(child_id.to_string()),
        route_id: route_id.map(str::to_string),
        date: Some(attendance.date),
        status: Some(attendance.present.into()),
        ..Default::default()
    }
}

/// Shape any payload. Untranslated parents fall back to the local id as-is.
pub fn wire_row(payload: &EntityPayload, refs: &ResolvedRefs, user_id: &str) -> WireRow {
    let parent = refs
        .parent
        .as_deref()
        .or(payload.parent_id())
        .unwrap_or_default();

    match payload {
        EntityPayload::Route(route) => route_row(route, user_id),
        EntityPayload::Point(point) => point_row(point, parent, user_id),
        EntityPayload::Child(child) => child_row(child, parent, user_id),
        EntityPayload::Attendance(attendance) => {
            attendance_row(attendance, parent, refs.route.as_deref(), user_id)
        }
    }
}

/// Build the remote write for an operation.
///
/// Returns `None` for update/delete when no server id is known for the target.
pub fn build_request(
    op_type: OperationType,
    payload: &EntityPayload,
    refs: &ResolvedRefs,
    user_id: &str,
    target: Option<String>,
) -> Option<WriteRequest> {
    let table = payload.table();
    match op_type {
        OperationType::Insert => Some(WriteRequest::Insert {
            table,
            row: wire_row(payload, refs, user_id),
        }),
        OperationType::Update => target.map(|server_id| WriteRequest::Update {
            table,
            server_id,
            row: wire_row(payload, refs, user_id),
        }),
        OperationType::Delete => target.map(|server_id| WriteRequest::Delete { table, server_id }),
    }
}
