//! In-memory stand-in for the Supabase backend
//!
//! Behaves like the real tables closely enough to exercise the sync engines:
//! server ids are assigned on insert, foreign keys are checked, deletes cascade,
//! and update/delete of an unknown id is a not-found error. Every call is
//! recorded, including the ones that fail.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::common::{RemoteBackend, SyncError};
use super::payload::WireRow;
use crate::models::sync::SyncTable;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Insert { table: SyncTable, row: Value },
    Update { table: SyncTable, id: String, row: Value },
    Delete { table: SyncTable, id: String },
    Select { table: SyncTable, user_id: String },
}

impl RecordedCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, RecordedCall::Select { .. })
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<SyncTable, Vec<Value>>,
    next_id: u64,
    calls: Vec<RecordedCall>,
    rejected: HashSet<SyncTable>,
    offline: bool,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

/// (child table, its foreign key column) for each parent table
fn dependents(table: SyncTable) -> &'static [(SyncTable, &'static str)] {
    match table {
        SyncTable::Routes => &[(SyncTable::Points, "route_id"), (SyncTable::Attendance, "route_id")],
        SyncTable::Points => &[(SyncTable::Children, "point_id")],
        SyncTable::Children => &[(SyncTable::Attendance, "child_id")],
        SyncTable::Attendance => &[],
    }
}

/// (foreign key column, referenced table) for each table
fn references(table: SyncTable) -> &'static [(&'static str, SyncTable)] {
    match table {
        SyncTable::Routes => &[],
        SyncTable::Points => &[("route_id", SyncTable::Routes)],
        SyncTable::Children => &[("point_id", SyncTable::Points)],
        SyncTable::Attendance => &[("child_id", SyncTable::Children), ("route_id", SyncTable::Routes)],
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

impl MemoryState {
    fn rows(&self, table: SyncTable) -> &[Value] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or_default()
    }

    fn contains(&self, table: SyncTable, id: &str) -> bool {
        self.rows(table).iter().any(|r| row_id(r) == Some(id))
    }

    fn guard(&self, table: SyncTable) -> Result<(), SyncError> {
        if self.offline {
            return Err(SyncError::RequestFailed("connection refused".to_string()));
        }
        if self.rejected.contains(&table) {
            return Err(SyncError::ApiError {
                status: 500,
                message: format!("{} is unavailable", table),
            });
        }
        Ok(())
    }

    fn check_references(&self, table: SyncTable, row: &Map<String, Value>) -> Result<(), SyncError> {
        for (column, parent) in references(table) {
            let Some(id) = row.get(*column).and_then(Value::as_str) else {
                continue;
            };
            if !self.contains(*parent, id) {
                return Err(SyncError::ApiError {
                    status: 409,
                    message: format!(
                        "insert or update on table \"{}\" violates foreign key constraint on {} = {}",
                        table, column, id
                    ),
                });
            }
        }
        Ok(())
    }

    fn remove_cascading(&mut self, table: SyncTable, id: &str) {
        if let Some(rows) = self.tables.get_mut(&table) {
            rows.retain(|r| row_id(r) != Some(id));
        }
        for (child_table, column) in dependents(table) {
            let doomed: Vec<String> = self
                .rows(*child_table)
                .iter()
                .filter(|r| r.get(*column).and_then(Value::as_str) == Some(id))
                .filter_map(|r| row_id(r).map(str::to_string))
                .collect();
            for child_id in doomed {
                self.remove_cascading(*child_table, &child_id);
            }
        }
    }
}

fn to_object(row: &WireRow) -> Result<Map<String, Value>, SyncError> {
    match serde_json::to_value(row) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SyncError::ParseError(format!("row is not an object: {}", other))),
        Err(e) => Err(SyncError::ParseError(e.to_string())),
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put a row straight into a table, as if another device had synced it
    pub fn seed(&self, table: SyncTable, row: Value) {
        self.lock().tables.entry(table).or_default().push(row);
    }

    pub fn rows(&self, table: SyncTable) -> Vec<Value> {
        self.lock().rows(table).to_vec()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls that attempted to change remote state
    pub fn writes(&self) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    /// Fail every call as a network error while set
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Answer every call for `table` with a server error
    pub fn reject_table(&self, table: SyncTable) {
        self.lock().rejected.insert(table);
    }

    pub fn accept_table(&self, table: SyncTable) {
        self.lock().rejected.remove(&table);
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn insert(
        &self,
        table: SyncTable,
        row: &WireRow,
        _access_token: &str,
    ) -> Result<String, SyncError> {
        let mut object = to_object(row)?;
        let mut state = self.lock();
        state.calls.push(RecordedCall::Insert {
            table,
            row: Value::Object(object.clone()),
        });
        state.guard(table)?;
        state.check_references(table, &object)?;

        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        object.insert("id".to_string(), json!(id));
        object.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        state
            .tables
            .entry(table)
            .or_default()
            .push(Value::Object(object));
        Ok(id)
    }

    async fn update(
        &self,
        table: SyncTable,
        id: &str,
        row: &WireRow,
        _access_token: &str,
    ) -> Result<(), SyncError> {
        let changes = to_object(row)?;
        let mut state = self.lock();
        state.calls.push(RecordedCall::Update {
            table,
            id: id.to_string(),
            row: Value::Object(changes.clone()),
        });
        state.guard(table)?;
        state.check_references(table, &changes)?;

        let target = state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| SyncError::NotFound {
                table,
                id: id.to_string(),
            })?;
        target.extend(changes);
        Ok(())
    }

    async fn delete(
        &self,
        table: SyncTable,
        id: &str,
        _access_token: &str,
    ) -> Result<(), SyncError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall::Delete {
            table,
            id: id.to_string(),
        });
        state.guard(table)?;

        if !state.contains(table, id) {
            return Err(SyncError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        state.remove_cascading(table, id);
        Ok(())
    }

    async fn select_owned(
        &self,
        table: SyncTable,
        user_id: &str,
        _access_token: &str,
    ) -> Result<Vec<Value>, SyncError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall::Select {
            table,
            user_id: user_id.to_string(),
        });
        state.guard(table)?;

        Ok(state
            .rows(table)
            .iter()
            .filter(|r| r.get("user_id").and_then(Value::as_str) == Some(user_id))
            .cloned()
            .collect())
    }
}
