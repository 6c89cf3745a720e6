//! Integration tests for worker heartbeat upserts.

use plangen_db::repositories::WorkerHeartbeatRepo;
use chrono::Duration;
use sqlx::types::chrono::{TimeZone, Utc};
use sqlx::PgPool;

#[sqlx::test(migrations = "../../db/migrations")]
async fn first_upsert_creates_row(pool: PgPool) {
    let hb = WorkerHeartbeatRepo::upsert(&pool, "worker-a", None, Utc::now())
        .await
        .unwrap();
    assert_eq!(hb.worker_id, "worker-a");
    assert!(hb.current_task_id.is_none());
    assert_eq!(hb.last_heartbeat_at, hb.started_at);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upsert_tracks_current_task_and_keeps_start_time(pool: PgPool) {
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let created = WorkerHeartbeatRepo::upsert(&pool, "worker-b", None, start)
        .await
        .unwrap();

    let later = start + Duration::seconds(60);
    let busy = WorkerHeartbeatRepo::upsert(&pool, "worker-b", Some(17), later)
        .await
        .unwrap();
    assert_eq!(busy.current_task_id, Some(17));
    assert_eq!(busy.started_at, created.started_at);
    assert_eq!(busy.last_heartbeat_at, later);

    let idle = WorkerHeartbeatRepo::upsert(&pool, "worker-b", None, later)
        .await
        .unwrap();
    assert!(idle.current_task_id.is_none());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM worker_heartbeats")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn workers_do_not_share_rows(pool: PgPool) {
    WorkerHeartbeatRepo::upsert(&pool, "one", Some(1), Utc::now()).await.unwrap();
    WorkerHeartbeatRepo::upsert(&pool, "two", Some(2), Utc::now()).await.unwrap();

    let one = WorkerHeartbeatRepo::find(&pool, "one").await.unwrap().unwrap();
    let two = WorkerHeartbeatRepo::find(&pool, "two").await.unwrap().unwrap();
    assert_eq!(one.current_task_id, Some(1));
    assert_eq!(two.current_task_id, Some(2));
    assert!(WorkerHeartbeatRepo::find(&pool, "three").await.unwrap().is_none());
}
