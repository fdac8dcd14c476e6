// Remote row shapes returned by `select *`, and their local counterparts

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::models::attendance::Attendance;
use crate::models::roster::{Child, Point, Route};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Server ids may be uuids or bigints; locally they are always strings
pub fn server_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_server_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Accepts timestamptz (`...+00:00`) as well as bare timestamps, which are taken as UTC
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteRoute {
    #[serde(deserialize_with = "server_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemotePoint {
    #[serde(deserialize_with = "server_id")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_server_id")]
    pub route_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteChild {
    #[serde(deserialize_with = "server_id")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_server_id")]
    pub point_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub responsible: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoteAttendance {
    #[serde(deserialize_with = "server_id")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_server_id")]
    pub child_id: Option<String>,
    pub date: NaiveDate,
    pub status: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

// Missing timestamps map to the epoch so re-running a download yields identical records

impl From<RemoteRoute> for Route {
    fn from(r: RemoteRoute) -> Self {
        Route {
            id: r.id,
            name: r.name,
            description: r.description,
            created_at: r.created_at.unwrap_or_default(),
        }
    }
}

impl From<RemotePoint> for Point {
    fn from(p: RemotePoint) -> Self {
        Point {
            id: p.id,
            route_id: p.route_id.unwrap_or_default(),
            name: p.name,
            address: p.address,
            created_at: p.created_at.unwrap_or_default(),
        }
    }
}

impl From<RemoteChild> for Child {
    fn from(c: RemoteChild) -> Self {
        Child {
            id: c.id,
            point_id: c.point_id.unwrap_or_default(),
            name: c.name,
            responsible: c.responsible,
            contact: c.contact,
            created_at: c.created_at.unwrap_or_default(),
        }
    }
}

impl From<RemoteAttendance> for Attendance {
    fn from(a: RemoteAttendance) -> Self {
        let timestamp = a
            .created_at
            .unwrap_or_else(|| a.date.and_time(chrono::NaiveTime::default()).and_utc());
        Attendance {
            id: a.id,
            child_id: a.child_id.unwrap_or_default(),
            date: a.date,
            present: a.status == "present",
            timestamp,
        }
    }
}
