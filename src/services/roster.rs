//! Roster mutations that also queue their sync operation.
//!
//! Each helper writes the local store first, then enqueues the matching operation.
//! Deletes enqueue only the root entity; the backend cascades to its dependents.

use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::database::local::attendance::{self as attendance_db, Marked};
use crate::database::local::children as children_db;
use crate::database::local::points as points_db;
use crate::database::local::queue;
use crate::database::local::routes as routes_db;
use crate::models::roster::{Child, ChildUpdate, Point, PointUpdate, Route, RouteUpdate};
use crate::models::sync::{EntityPayload, OperationType};

async fn queue_op(
    pool: &SqlitePool,
    op_type: OperationType,
    payload: impl Into<EntityPayload>,
) -> Result<(), String> {
    let payload = payload.into();
    let local_id = payload.id().to_string();
    queue::enqueue(pool, op_type, payload, &local_id).await?;
    Ok(())
}

// Routes

pub async fn create_route(
    pool: &SqlitePool,
    name: String,
    description: Option<String>,
) -> Result<Route, String> {
    let route = routes_db::add_route(pool, name, description).await;
    queue_op(pool, OperationType::Insert, route.clone()).await?;
    Ok(route)
}

pub async fn update_route(
    pool: &SqlitePool,
    id: &str,
    updates: RouteUpdate,
) -> Result<Option<Route>, String> {
    let Some(route) = routes_db::update_route(pool, id, updates).await else {
        return Ok(None);
    };
    queue_op(pool, OperationType::Update, route.clone()).await?;
    Ok(Some(route))
}

pub async fn delete_route(pool: &SqlitePool, id: &str) -> Result<Option<Route>, String> {
    let Some(route) = routes_db::delete_route(pool, id).await else {
        return Ok(None);
    };
    queue_op(pool, OperationType::Delete, route.clone()).await?;
    Ok(Some(route))
}

// Points

pub async fn create_point(
    pool: &SqlitePool,
    route_id: String,
    name: String,
    address: Option<String>,
) -> Result<Point, String> {
    let point = points_db::add_point(pool, route_id, name, address).await;
    queue_op(pool, OperationType::Insert, point.clone()).await?;
    Ok(point)
}

pub async fn update_point(
    pool: &SqlitePool,
    id: &str,
    updates: PointUpdate,
) -> Result<Option<Point>, String> {
    let Some(point) = points_db::update_point(pool, id, updates).await else {
        return Ok(None);
    };
    queue_op(pool, OperationType::Update, point.clone()).await?;
    Ok(Some(point))
}

pub async fn delete_point(pool: &SqlitePool, id: &str) -> Result<Option<Point>, String> {
    let Some(point) = points_db::delete_point(pool, id).await else {
        return Ok(None);
    };
    queue_op(pool, OperationType::Delete, point.clone()).await?;
    Ok(Some(point))
}

// Children

pub async fn create_child(
    pool: &SqlitePool,
    point_id: String,
    name: String,
    responsible: Option<String>,
    contact: Option<String>,
) -> Result<Child, String> {
    let child = children_db::add_child(pool, point_id, name, responsible, contact).await;
    queue_op(pool, OperationType::Insert, child.clone()).await?;
    Ok(child)
}

pub async fn update_child(
    pool: &SqlitePool,
    id: &str,
    updates: ChildUpdate,
) -> Result<Option<Child>, String> {
    let Some(child) = children_db::update_child(pool, id, updates).await else {
        return Ok(None);
    };
    queue_op(pool, OperationType::Update, child.clone()).await?;
    Ok(Some(child))
}

pub async fn delete_child(pool: &SqlitePool, id: &str) -> Result<Option<Child>, String> {
    let Some(child) = children_db::delete_child(pool, id).await else {
        return Ok(None);
    };
    queue_op(pool, OperationType::Delete, child.clone()).await?;
    Ok(Some(child))
}

// Attendance

/// First mark of the day queues an insert, later marks an update of the same record
pub async fn mark_attendance(
    pool: &SqlitePool,
    child_id: &str,
    date: NaiveDate,
    present: bool,
) -> Result<Marked, String> {
    let marked = attendance_db::mark_attendance(pool, child_id, date, present).await;
    let op_type = match marked {
        Marked::Created(_) => OperationType::Insert,
        Marked::Superseded(_) => OperationType::Update,
    };
    queue_op(pool, op_type, marked.record().clone()).await?;
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_in_memory;
    use crate::models::sync::SyncTable;

    #[tokio::test]
    async fn each_mutation_queues_one_operation() {
        let db = open_in_memory().await.unwrap();
        let pool = &db.0;

        let route = create_route(pool, "Norte".into(), None).await.unwrap();
        let point = create_point(pool, route.id.clone(), "Praça".into(), None)
            .await
            .unwrap();
        update_point(
            pool,
            &point.id,
            PointUpdate {
                name: Some("Praça Central".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let ops = queue::peek_all(pool).await.unwrap();
        let kinds: Vec<_> = ops.iter().map(|o| (o.op_type, o.table)).collect();
        assert_eq!(
            kinds,
            vec![
                (OperationType::Insert, SyncTable::Routes),
                (OperationType::Insert, SyncTable::Points),
                (OperationType::Update, SyncTable::Points),
            ]
        );
        assert_eq!(ops[2].local_id, point.id);
    }

    #[tokio::test]
    async fn missing_entities_queue_nothing() {
        let db = open_in_memory().await.unwrap();
        assert!(delete_route(&db.0, "nope").await.unwrap().is_none());
        assert!(update_child(&db.0, "nope", ChildUpdate::default())
            .await
            .unwrap()
            .is_none());
        assert_eq!(queue::depth(&db.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cascade_delete_queues_only_the_root() {
        let db = open_in_memory().await.unwrap();
        let pool = &db.0;
        let route = create_route(pool, "Norte".into(), None).await.unwrap();
        let point = create_point(pool, route.id.clone(), "Praça".into(), None)
            .await
            .unwrap();
        create_child(pool, point.id.clone(), "Ana".into(), None, None)
            .await
            .unwrap();

        delete_route(pool, &route.id).await.unwrap();

        let ops = queue::peek_all(pool).await.unwrap();
        let deletes: Vec<_> = ops
            .iter()
            .filter(|o| o.op_type == OperationType::Delete)
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].table, SyncTable::Routes);
    }

    #[tokio::test]
    async fn remarking_a_day_queues_an_update() {
        let db = open_in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();

        let first = mark_attendance(&db.0, "c1", day, true).await.unwrap();
        let second = mark_attendance(&db.0, "c1", day, false).await.unwrap();
        assert_eq!(first.record().id, second.record().id);

        let ops = queue::peek_all(&db.0).await.unwrap();
        assert_eq!(ops[0].op_type, OperationType::Insert);
        assert_eq!(ops[1].op_type, OperationType::Update);
        assert_eq!(ops[1].local_id, first.record().id);
    }
}
