use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::roster::Child;
use super::Record;

/// Per-day presence record for a child. At most one per (child_id, date).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: String,
    pub child_id: String,
    /// Serialized as `YYYY-MM-DD`
    pub date: NaiveDate,
    pub present: bool,
    pub timestamp: DateTime<Utc>,
}

/// Incident note attached to a child on a given day
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub id: String,
    pub child_id: String,
    pub occurrence_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    pub date: NaiveDate,
}

/// One line of the monthly report
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReportRow {
    pub child: Child,
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

/// A weekday cell of a child's monthly calendar
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day: u32,
    pub weekday: chrono::Weekday,
    /// `None` when nothing was recorded for that day
    pub present: Option<bool>,
}

impl Record for Attendance {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.child_id)
    }
}

impl Record for Occurrence {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.child_id)
    }
}
