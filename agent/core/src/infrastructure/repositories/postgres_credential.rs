// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Credential Exchange
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `CredentialExchangeRepository` over `credential_exchanges`

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::credential::{CredentialExchange, CredentialExchangeId, ExchangeRole};
use crate::domain::partner::PartnerId;
use crate::domain::repository::{CredentialExchangeRepository, RepositoryError};

pub struct PostgresCredentialExchangeRepository {
    pool: PgPool,
}

impl PostgresCredentialExchangeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn role_column(role: ExchangeRole) -> &'static str {
    match role {
        ExchangeRole::Holder => "holder",
        ExchangeRole::Issuer => "issuer",
    }
}

fn parse_exchange_row(row: PgRow) -> Result<CredentialExchange, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

fn parse_exchange_rows(rows: Vec<PgRow>) -> Result<Vec<CredentialExchange>, RepositoryError> {
    rows.into_iter().map(parse_exchange_row).collect()
}

#[async_trait]
impl CredentialExchangeRepository for PostgresCredentialExchangeRepository {
    async fn save(&self, exchange: &CredentialExchange) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(exchange)?;

        sqlx::query(
            r#"
            INSERT INTO credential_exchanges (
                id, exchange_id, partner_id, role, referent, rev_reg_id, cred_rev_id,
                revoked, document, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                partner_id = EXCLUDED.partner_id,
                referent = EXCLUDED.referent,
                rev_reg_id = EXCLUDED.rev_reg_id,
                cred_rev_id = EXCLUDED.cred_rev_id,
                revoked = EXCLUDED.revoked,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(exchange.id.0)
        .bind(&exchange.exchange_id)
        .bind(exchange.partner_id.map(|p| p.0))
        .bind(role_column(exchange.role))
        .bind(&exchange.referent)
        .bind(&exchange.revocation.rev_reg_id)
        .bind(&exchange.revocation.cred_rev_id)
        .bind(exchange.revocation.revoked)
        .bind(document)
        .bind(exchange.created_at)
        .bind(exchange.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save credential exchange: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: CredentialExchangeId) -> Result<Option<CredentialExchange>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM credential_exchanges WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_exchange_row).transpose()
    }

    async fn find_by_exchange_id(&self, exchange_id: &str) -> Result<Option<CredentialExchange>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM credential_exchanges WHERE exchange_id = $1")
            .bind(exchange_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_exchange_row).transpose()
    }

    async fn find_by_revocation(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
    ) -> Result<Option<CredentialExchange>, RepositoryError> {
        let row = sqlx::query(
            "SELECT document FROM credential_exchanges WHERE rev_reg_id = $1 AND cred_rev_id = $2",
        )
        .bind(rev_reg_id)
        .bind(cred_rev_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(parse_exchange_row).transpose()
    }

    async fn find_revocation_candidates(&self) -> Result<Vec<CredentialExchange>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM credential_exchanges
            WHERE role = 'holder' AND NOT revoked AND referent IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        parse_exchange_rows(rows)
    }

    async fn list_by_partner(&self, partner_id: PartnerId) -> Result<Vec<CredentialExchange>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM credential_exchanges WHERE partner_id = $1")
            .bind(partner_id.0)
            .fetch_all(&self.pool)
            .await?;
        parse_exchange_rows(rows)
    }

    async fn list_by_role(&self, role: Option<ExchangeRole>) -> Result<Vec<CredentialExchange>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM credential_exchanges
            WHERE ($1::TEXT IS NULL OR role = $1)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(role.map(role_column))
        .fetch_all(&self.pool)
        .await?;
        parse_exchange_rows(rows)
    }

    async fn delete(&self, id: CredentialExchangeId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM credential_exchanges WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
