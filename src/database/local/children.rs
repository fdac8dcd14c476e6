use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::collections::{self, Collection};
use super::{attendance, occurrences};
use crate::models::roster::{Child, ChildUpdate};

pub async fn list_children(pool: &SqlitePool) -> Vec<Child> {
    collections::get(pool, Collection::Children).await
}

pub async fn children_by_point(pool: &SqlitePool, point_id: &str) -> Vec<Child> {
    list_children(pool)
        .await
        .into_iter()
        .filter(|c| c.point_id == point_id)
        .collect()
}

pub async fn get_child(pool: &SqlitePool, id: &str) -> Option<Child> {
    list_children(pool).await.into_iter().find(|c| c.id == id)
}

pub async fn add_child(
    pool: &SqlitePool,
    point_id: String,
    name: String,
    responsible: Option<String>,
    contact: Option<String>,
) -> Child {
    let child = Child {
        id: Uuid::new_v4().to_string(),
        point_id,
        name,
        responsible,
        contact,
        created_at: Utc::now(),
    };

    let mut children = list_children(pool).await;
    children.push(child.clone());
    collections::put(pool, Collection::Children, &children).await;
    child
}

pub async fn update_child(pool: &SqlitePool, id: &str, updates: ChildUpdate) -> Option<Child> {
    let mut children = list_children(pool).await;
    let child = children.iter_mut().find(|c| c.id == id)?;

    if let Some(point_id) = updates.point_id {
        child.point_id = point_id;
    }
    if let Some(name) = updates.name {
        child.name = name;
    }
    if let Some(responsible) = updates.responsible {
        child.responsible = Some(responsible);
    }
    if let Some(contact) = updates.contact {
        child.contact = Some(contact);
    }
    let updated = child.clone();

    collections::put(pool, Collection::Children, &children).await;
    Some(updated)
}

/// Delete a child together with its attendance and occurrences
pub async fn delete_child(pool: &SqlitePool, id: &str) -> Option<Child> {
    let mut children = list_children(pool).await;
    let index = children.iter().position(|c| c.id == id)?;
    let removed = children.remove(index);
    collections::put(pool, Collection::Children, &children).await;

    let ids = [removed.id.clone()];
    attendance::purge_for_children(pool, &ids).await;
    occurrences::purge_for_children(pool, &ids).await;
    Some(removed)
}

/// Remove every child under the given points, cascading further down
pub async fn purge_for_points(pool: &SqlitePool, point_ids: &[String]) {
    let (removed, kept): (Vec<Child>, Vec<Child>) = list_children(pool)
        .await
        .into_iter()
        .partition(|c| point_ids.contains(&c.point_id));
    if removed.is_empty() {
        return;
    }

    collections::put(pool, Collection::Children, &kept).await;
    let child_ids: Vec<String> = removed.into_iter().map(|c| c.id).collect();
    attendance::purge_for_children(pool, &child_ids).await;
    occurrences::purge_for_children(pool, &child_ids).await;
}
