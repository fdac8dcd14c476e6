use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::children;
use super::collections::{self, Collection};
use crate::models::roster::{Point, PointUpdate};

pub async fn list_points(pool: &SqlitePool) -> Vec<Point> {
    collections::get(pool, Collection::Points).await
}

pub async fn points_by_route(pool: &SqlitePool, route_id: &str) -> Vec<Point> {
    list_points(pool)
        .await
        .into_iter()
        .filter(|p| p.route_id == route_id)
        .collect()
}

pub async fn get_point(pool: &SqlitePool, id: &str) -> Option<Point> {
    list_points(pool).await.into_iter().find(|p| p.id == id)
}

pub async fn add_point(
    pool: &SqlitePool,
    route_id: String,
    name: String,
    address: Option<String>,
) -> Point {
    let point = Point {
        id: Uuid::new_v4().to_string(),
        route_id,
        name,
        address,
        created_at: Utc::now(),
    };

    let mut points = list_points(pool).await;
    points.push(point.clone());
    collections::put(pool, Collection::Points, &points).await;
    point
}

pub async fn update_point(pool: &SqlitePool, id: &str, updates: PointUpdate) -> Option<Point> {
    let mut points = list_points(pool).await;
    let point = points.iter_mut().find(|p| p.id == id)?;

    if let Some(route_id) = updates.route_id {
        point.route_id = route_id;
    }
    if let Some(name) = updates.name {
        point.name = name;
    }
    if let Some(address) = updates.address {
        point.address = Some(address);
    }
    let updated = point.clone();

    collections::put(pool, Collection::Points, &points).await;
    Some(updated)
}

/// Delete a point (cascades to its children and their attendance)
pub async fn delete_point(pool: &SqlitePool, id: &str) -> Option<Point> {
    let mut points = list_points(pool).await;
    let index = points.iter().position(|p| p.id == id)?;
    let removed = points.remove(index);
    collections::put(pool, Collection::Points, &points).await;

    children::purge_for_points(pool, &[removed.id.clone()]).await;
    Some(removed)
}

/// Remove every point under the given routes, cascading further down
pub async fn purge_for_routes(pool: &SqlitePool, route_ids: &[String]) {
    let (removed, kept): (Vec<Point>, Vec<Point>) = list_points(pool)
        .await
        .into_iter()
        .partition(|p| route_ids.contains(&p.route_id));
    if removed.is_empty() {
        return;
    }

    collections::put(pool, Collection::Points, &kept).await;
    let point_ids: Vec<String> = removed.into_iter().map(|p| p.id).collect();
    children::purge_for_points(pool, &point_ids).await;
}
