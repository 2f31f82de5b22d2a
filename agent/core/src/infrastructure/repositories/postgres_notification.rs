// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Notification Queue
//!
//! `take_all` deletes and returns in one statement, so a message is handed to exactly one
//! drainer even when two sessions connect at once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::notification::{PushMessage, QueuedNotification};
use crate::domain::repository::{NotificationQueueRepository, RepositoryError};

pub struct PostgresNotificationQueue {
    pool: PgPool,
}

impl PostgresNotificationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_queued_row(row: PgRow) -> Result<QueuedNotification, RepositoryError> {
    let message: serde_json::Value = row.try_get("message")?;
    let queued_at: DateTime<Utc> = row.try_get("queued_at")?;
    Ok(QueuedNotification {
        id: row.try_get::<Uuid, _>("id")?,
        sequence: row.try_get("seq")?,
        message: serde_json::from_value(message)?,
        queued_at,
    })
}

#[async_trait]
impl NotificationQueueRepository for PostgresNotificationQueue {
    async fn enqueue(&self, message: &PushMessage) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO notification_queue (id, message, queued_at) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(serde_json::to_value(message)?)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to enqueue notification: {}", e)))?;
        Ok(())
    }

    async fn take_all(&self) -> Result<Vec<QueuedNotification>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            WITH drained AS (
                DELETE FROM notification_queue RETURNING seq, id, message, queued_at
            )
            SELECT seq, id, message, queued_at FROM drained ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_queued_row).collect()
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
