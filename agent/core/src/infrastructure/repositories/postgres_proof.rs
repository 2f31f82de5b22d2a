// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Proof Exchange
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `ProofExchangeRepository` over `proof_exchanges`

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::partner::PartnerId;
use crate::domain::proof::{ProofExchange, ProofExchangeId};
use crate::domain::repository::{ProofExchangeRepository, RepositoryError};

pub struct PostgresProofExchangeRepository {
    pool: PgPool,
}

impl PostgresProofExchangeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_proof_row(row: PgRow) -> Result<ProofExchange, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

#[async_trait]
impl ProofExchangeRepository for PostgresProofExchangeRepository {
    async fn save(&self, exchange: &ProofExchange) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(exchange)?;

        sqlx::query(
            r#"
            INSERT INTO proof_exchanges (id, exchange_id, partner_id, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                partner_id = EXCLUDED.partner_id,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(exchange.id.0)
        .bind(&exchange.exchange_id)
        .bind(exchange.partner_id.map(|p| p.0))
        .bind(document)
        .bind(exchange.created_at)
        .bind(exchange.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save proof exchange: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: ProofExchangeId) -> Result<Option<ProofExchange>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM proof_exchanges WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_proof_row).transpose()
    }

    async fn find_by_exchange_id(&self, exchange_id: &str) -> Result<Option<ProofExchange>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM proof_exchanges WHERE exchange_id = $1")
            .bind(exchange_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_proof_row).transpose()
    }

    async fn list_by_partner(&self, partner_id: PartnerId) -> Result<Vec<ProofExchange>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM proof_exchanges WHERE partner_id = $1 ORDER BY updated_at DESC")
            .bind(partner_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(parse_proof_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<ProofExchange>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM proof_exchanges ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(parse_proof_row).collect()
    }

    async fn delete(&self, id: ProofExchangeId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM proof_exchanges WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
