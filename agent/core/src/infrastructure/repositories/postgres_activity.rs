// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Activity
//!
//! The `(link_id, activity_type, role)` unique constraint backs the natural key, so a
//! racing second insert for the same key updates the first row instead of duplicating it.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `ActivityRepository` over `activities`

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::activity::{Activity, ActivityFilter, ActivityId, ActivityKey};
use crate::domain::partner::PartnerId;
use crate::domain::repository::{ActivityRepository, RepositoryError};

pub struct PostgresActivityRepository {
    pool: PgPool,
}

impl PostgresActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Column text of a unit enum, identical to its serde name.
fn label<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(RepositoryError::Serialization(format!("expected a string label, got {}", other))),
    }
}

fn parse_activity_row(row: PgRow) -> Result<Activity, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl ActivityRepository for PostgresActivityRepository {
    async fn save(&self, activity: &Activity) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(activity)?;

        sqlx::query(
            r#"
            INSERT INTO activities (
                id, link_id, activity_type, role, partner_id, completed, document, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (link_id, activity_type, role) DO UPDATE SET
                partner_id = EXCLUDED.partner_id,
                completed = EXCLUDED.completed,
                document = jsonb_set(EXCLUDED.document, '{id}', to_jsonb(activities.id::TEXT)),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(activity.id.0)
        .bind(&activity.link_id)
        .bind(label(&activity.activity_type)?)
        .bind(label(&activity.role)?)
        .bind(activity.partner_id.map(|p| p.0))
        .bind(activity.completed)
        .bind(document)
        .bind(activity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save activity: {}", e)))?;

        Ok(())
    }

    async fn find_by_key(&self, key: &ActivityKey) -> Result<Option<Activity>, RepositoryError> {
        let row = sqlx::query(
            "SELECT document FROM activities WHERE link_id = $1 AND activity_type = $2 AND role = $3",
        )
        .bind(&key.link_id)
        .bind(label(&key.activity_type)?)
        .bind(label(&key.role)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(parse_activity_row).transpose()
    }

    async fn list(&self, filter: &ActivityFilter) -> Result<Vec<Activity>, RepositoryError> {
        let activity_type = filter.activity_type.as_ref().map(label).transpose()?;
        let rows = sqlx::query(
            r#"
            SELECT document FROM activities
            WHERE ($1::BOOLEAN IS NULL OR completed = $1)
              AND ($2::TEXT IS NULL OR activity_type = $2)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(filter.completed)
        .bind(activity_type)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_activity_row).collect()
    }

    async fn delete(&self, id: ActivityId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM activities WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_partner(&self, partner_id: PartnerId) -> Result<usize, RepositoryError> {
        let result = sqlx::query("DELETE FROM activities WHERE partner_id = $1")
            .bind(partner_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
