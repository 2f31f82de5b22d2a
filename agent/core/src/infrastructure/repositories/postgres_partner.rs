// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Partner
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `PartnerRepository` over the `partners` table

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::partner::{ConnectionState, Partner, PartnerId};
use crate::domain::repository::{PartnerRepository, RepositoryError};

pub struct PostgresPartnerRepository {
    pool: PgPool,
}

impl PostgresPartnerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_partner_row(row: PgRow) -> Result<Partner, RepositoryError> {
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

fn parse_partner_rows(rows: Vec<PgRow>) -> Result<Vec<Partner>, RepositoryError> {
    rows.into_iter().map(parse_partner_row).collect()
}

#[async_trait]
impl PartnerRepository for PostgresPartnerRepository {
    async fn save(&self, partner: &Partner) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(partner)?;

        sqlx::query(
            r#"
            INSERT INTO partners (
                id, connection_id, invitation_msg_id, did, state, trust_ping,
                document, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                connection_id = EXCLUDED.connection_id,
                invitation_msg_id = EXCLUDED.invitation_msg_id,
                did = EXCLUDED.did,
                state = EXCLUDED.state,
                trust_ping = EXCLUDED.trust_ping,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(partner.id.0)
        .bind(&partner.connection_id)
        .bind(&partner.invitation_msg_id)
        .bind(&partner.did)
        .bind(partner.state.as_str())
        .bind(partner.trust_ping)
        .bind(document)
        .bind(partner.created_at)
        .bind(partner.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save partner: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: PartnerId) -> Result<Option<Partner>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM partners WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_partner_row).transpose()
    }

    async fn find_by_connection_id(&self, connection_id: &str) -> Result<Option<Partner>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM partners WHERE connection_id = $1")
            .bind(connection_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_partner_row).transpose()
    }

    async fn find_by_invitation_msg_id(&self, invitation_msg_id: &str) -> Result<Option<Partner>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM partners WHERE invitation_msg_id = $1")
            .bind(invitation_msg_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_partner_row).transpose()
    }

    async fn find_by_did(&self, did: &str) -> Result<Vec<Partner>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM partners WHERE did = $1 ORDER BY created_at")
            .bind(did)
            .fetch_all(&self.pool)
            .await?;
        parse_partner_rows(rows)
    }

    async fn find_pingable(&self, states: &[ConnectionState]) -> Result<Vec<Partner>, RepositoryError> {
        let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query(
            r#"
            SELECT document FROM partners
            WHERE trust_ping AND connection_id IS NOT NULL AND state = ANY($1)
            "#,
        )
        .bind(&states)
        .fetch_all(&self.pool)
        .await?;
        parse_partner_rows(rows)
    }

    async fn list_all(&self) -> Result<Vec<Partner>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM partners ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        parse_partner_rows(rows)
    }

    async fn delete(&self, id: PartnerId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM partners WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
