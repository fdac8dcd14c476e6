use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::collections::{self, Collection};
use crate::models::attendance::Occurrence;

/// All occurrences, most recent first
pub async fn list_occurrences(pool: &SqlitePool) -> Vec<Occurrence> {
    let mut occurrences: Vec<Occurrence> = collections::get(pool, Collection::Occurrences).await;
    // stable sort keeps insertion order within a day
    occurrences.sort_by(|a, b| b.date.cmp(&a.date));
    occurrences
}

pub async fn add_occurrence(
    pool: &SqlitePool,
    child_id: String,
    occurrence_type: String,
    observation: Option<String>,
    date: NaiveDate,
) -> Occurrence {
    let occurrence = Occurrence {
        id: Uuid::new_v4().to_string(),
        child_id,
        occurrence_type,
        observation,
        date,
    };

    let mut occurrences: Vec<Occurrence> = collections::get(pool, Collection::Occurrences).await;
    occurrences.push(occurrence.clone());
    collections::put(pool, Collection::Occurrences, &occurrences).await;
    occurrence
}

pub async fn delete_occurrence(pool: &SqlitePool, id: &str) -> bool {
    let mut occurrences: Vec<Occurrence> = collections::get(pool, Collection::Occurrences).await;
    let before = occurrences.len();
    occurrences.retain(|o| o.id != id);
    if occurrences.len() == before {
        return false;
    }
    collections::put(pool, Collection::Occurrences, &occurrences).await;
    true
}

pub async fn purge_for_children(pool: &SqlitePool, child_ids: &[String]) {
    let occurrences: Vec<Occurrence> = collections::get(pool, Collection::Occurrences).await;
    let before = occurrences.len();
    let kept: Vec<Occurrence> = occurrences
        .into_iter()
        .filter(|o| !child_ids.contains(&o.child_id))
        .collect();

    if kept.len() != before {
        collections::put(pool, Collection::Occurrences, &kept).await;
    }
}
