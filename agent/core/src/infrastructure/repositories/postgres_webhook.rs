// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Webhook

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, WebhookRepository};
use crate::domain::webhook::{RegisteredWebhook, WebhookId};

pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_webhook_row(row: PgRow) -> Result<RegisteredWebhook, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn save(&self, webhook: &RegisteredWebhook) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, url, document, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET url = EXCLUDED.url, document = EXCLUDED.document
            "#,
        )
        .bind(webhook.id.0)
        .bind(&webhook.url)
        .bind(serde_json::to_value(webhook)?)
        .bind(webhook.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save webhook: {}", e)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: WebhookId) -> Result<Option<RegisteredWebhook>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM webhooks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_webhook_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<RegisteredWebhook>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM webhooks ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(parse_webhook_row).collect()
    }

    async fn delete(&self, id: WebhookId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("webhook {}", id)));
        }
        Ok(())
    }
}
