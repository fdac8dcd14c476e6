use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// A transport line grouping boarding points
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A boarding/drop-off location on a route
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub id: String,
    pub route_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A rider assigned to exactly one point
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: String,
    pub point_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update for a route; `None` leaves the field untouched
#[derive(Debug, Clone, Default)]
pub struct RouteUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PointUpdate {
    pub route_id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChildUpdate {
    pub point_id: Option<String>,
    pub name: Option<String>,
    pub responsible: Option<String>,
    pub contact: Option<String>,
}

impl Record for Route {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Point {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.route_id)
    }
}

impl Record for Child {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.point_id)
    }
}
