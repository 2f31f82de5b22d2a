// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Schema and Credential Definition

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{CredentialDefinitionRepository, RepositoryError, SchemaRepository};
use crate::domain::schema::{CredentialDefinition, SchemaRef};

fn parse_document<T: serde::de::DeserializeOwned>(row: PgRow) -> Result<T, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

pub struct PostgresSchemaRepository {
    pool: PgPool,
}

impl PostgresSchemaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaRepository for PostgresSchemaRepository {
    async fn save(&self, schema: &SchemaRef) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO schemas (id, schema_id, document, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (schema_id) DO UPDATE SET document = EXCLUDED.document
            "#,
        )
        .bind(schema.id)
        .bind(&schema.schema_id)
        .bind(serde_json::to_value(schema)?)
        .bind(schema.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save schema: {}", e)))?;
        Ok(())
    }

    async fn find_by_schema_id(&self, schema_id: &str) -> Result<Option<SchemaRef>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM schemas WHERE schema_id = $1")
            .bind(schema_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_document).transpose()
    }

    async fn list_all(&self) -> Result<Vec<SchemaRef>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM schemas ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(parse_document).collect()
    }
}

pub struct PostgresCredentialDefinitionRepository {
    pool: PgPool,
}

impl PostgresCredentialDefinitionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialDefinitionRepository for PostgresCredentialDefinitionRepository {
    async fn save(&self, definition: &CredentialDefinition) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO credential_definitions (id, schema_id, cred_def_id, document, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cred_def_id) DO UPDATE SET document = EXCLUDED.document
            "#,
        )
        .bind(definition.id)
        .bind(&definition.schema_id)
        .bind(&definition.cred_def_id)
        .bind(serde_json::to_value(definition)?)
        .bind(definition.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save credential definition: {}", e)))?;
        Ok(())
    }

    async fn find_by_schema_id(&self, schema_id: &str) -> Result<Vec<CredentialDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT document FROM credential_definitions WHERE schema_id = $1 ORDER BY created_at",
        )
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_document).collect()
    }

    async fn find_by_cred_def_id(&self, cred_def_id: &str) -> Result<Option<CredentialDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM credential_definitions WHERE cred_def_id = $1")
            .bind(cred_def_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_document).transpose()
    }
}
