use chrono::{Datelike, NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::collections::{self, Collection};
use crate::models::attendance::Attendance;

/// Result of marking attendance for a (child, date) pair
#[derive(Debug, Clone, PartialEq)]
pub enum Marked {
    /// No record existed for that day
    Created(Attendance),
    /// The earlier record for that day was overwritten in place (same id)
    Superseded(Attendance),
}

impl Marked {
    pub fn record(&self) -> &Attendance {
        match self {
            Marked::Created(a) | Marked::Superseded(a) => a,
        }
    }

    pub fn into_record(self) -> Attendance {
        match self {
            Marked::Created(a) | Marked::Superseded(a) => a,
        }
    }
}

pub async fn list_attendance(pool: &SqlitePool) -> Vec<Attendance> {
    collections::get(pool, Collection::Attendance).await
}

pub async fn attendance_by_child(pool: &SqlitePool, child_id: &str) -> Vec<Attendance> {
    list_attendance(pool)
        .await
        .into_iter()
        .filter(|a| a.child_id == child_id)
        .collect()
}

pub async fn attendance_on(pool: &SqlitePool, date: NaiveDate) -> Vec<Attendance> {
    list_attendance(pool)
        .await
        .into_iter()
        .filter(|a| a.date == date)
        .collect()
}

pub async fn today_attendance(pool: &SqlitePool) -> Vec<Attendance> {
    attendance_on(pool, Utc::now().date_naive()).await
}

/// Records whose date falls in the given month (`month` is 1-based)
pub async fn attendance_for_month(pool: &SqlitePool, year: i32, month: u32) -> Vec<Attendance> {
    list_attendance(pool)
        .await
        .into_iter()
        .filter(|a| a.date.year() == year && a.date.month() == month)
        .collect()
}

/// Mark a child present/absent on `date`.
///
/// A second mark for the same (child, date) supersedes the first: the record keeps its
/// id so a queued insert and any later update target the same remote row.
pub async fn mark_attendance(
    pool: &SqlitePool,
    child_id: &str,
    date: NaiveDate,
    present: bool,
) -> Marked {
    let mut records = list_attendance(pool).await;
    let existing_id = records
        .iter()
        .find(|a| a.child_id == child_id && a.date == date)
        .map(|a| a.id.clone());

    // also clears any stray duplicates for the pair
    records.retain(|a| !(a.child_id == child_id && a.date == date));

    let record = Attendance {
        id: existing_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        child_id: child_id.to_string(),
        date,
        present,
        timestamp: Utc::now(),
    };
    records.push(record.clone());
    collections::put(pool, Collection::Attendance, &records).await;

    match existing_id {
        Some(_) => Marked::Superseded(record),
        None => Marked::Created(record),
    }
}

pub async fn purge_for_children(pool: &SqlitePool, child_ids: &[String]) {
    let records = list_attendance(pool).await;
    let before = records.len();
    let kept: Vec<Attendance> = records
        .into_iter()
        .filter(|a| !child_ids.contains(&a.child_id))
        .collect();

    if kept.len() != before {
        collections::put(pool, Collection::Attendance, &kept).await;
    }
}
