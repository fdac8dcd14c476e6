use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::collections::{self, Collection};
use super::points;
use crate::models::roster::{Route, RouteUpdate};

/// List all routes in insertion order
pub async fn list_routes(pool: &SqlitePool) -> Vec<Route> {
    collections::get(pool, Collection::Routes).await
}

pub async fn get_route(pool: &SqlitePool, id: &str) -> Option<Route> {
    list_routes(pool).await.into_iter().find(|r| r.id == id)
}

/// Create a new route with a fresh local id
pub async fn add_route(pool: &SqlitePool, name: String, description: Option<String>) -> Route {
    let route = Route {
        id: Uuid::new_v4().to_string(),
        name,
        description,
        created_at: Utc::now(),
    };

    let mut routes = list_routes(pool).await;
    routes.push(route.clone());
    collections::put(pool, Collection::Routes, &routes).await;
    route
}

/// Apply a partial update. Returns the updated route, or `None` if it doesn't exist.
pub async fn update_route(pool: &SqlitePool, id: &str, updates: RouteUpdate) -> Option<Route> {
    let mut routes = list_routes(pool).await;
    let route = routes.iter_mut().find(|r| r.id == id)?;

    if let Some(name) = updates.name {
        route.name = name;
    }
    if let Some(description) = updates.description {
        route.description = Some(description);
    }
    let updated = route.clone();

    collections::put(pool, Collection::Routes, &routes).await;
    Some(updated)
}

/// Delete a route (cascades to points, children and their attendance)
pub async fn delete_route(pool: &SqlitePool, id: &str) -> Option<Route> {
    let mut routes = list_routes(pool).await;
    let index = routes.iter().position(|r| r.id == id)?;
    let removed = routes.remove(index);
    collections::put(pool, Collection::Routes, &routes).await;

    points::purge_for_routes(pool, &[removed.id.clone()]).await;
    Some(removed)
}
