use super::{
    FlowStore, FlowUpdate, LoginFlow, LoginFlowStore, NewLoginFlow, NewRegistrationFlow,
    RegistrationFlow, TokenRecord, TokenStore,
};
use crate::{jwt::ValidatedClaims, registration::FlowState};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tracing::Instrument;
use uuid::Uuid;

const FLOW_COLUMNS: &str = "id, state, email, password_hash, phone, cookie_consent, \
    feedback_consent, yes_to_emails, previous_url, token_id, touched_at, created_at";

/// Postgres-backed token, registration flow and login flow storage.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn token_from_row(row: &PgRow) -> Result<TokenRecord> {
    let Json(claims): Json<ValidatedClaims> = row
        .try_get("claims")
        .context("failed to decode stored token claims")?;
    Ok(TokenRecord {
        id: row.get("id"),
        claims,
        created_at: row.get("created_at"),
    })
}

fn flow_from_row(row: &PgRow) -> Result<RegistrationFlow> {
    let state: String = row.get("state");
    let state =
        FlowState::from_str(&state).ok_or_else(|| anyhow!("unknown registration state: {state}"))?;
    let password_hash: String = row.get("password_hash");
    Ok(RegistrationFlow {
        id: row.get("id"),
        state,
        email: row.get("email"),
        password_hash: SecretString::from(password_hash),
        phone: row.get("phone"),
        cookie_consent: row.get("cookie_consent"),
        feedback_consent: row.get("feedback_consent"),
        yes_to_emails: row.get("yes_to_emails"),
        previous_url: row.get("previous_url"),
        token_id: row.get("token_id"),
        touched_at: row.get("touched_at"),
        created_at: row.get("created_at"),
    })
}

fn login_flow_from_row(row: &PgRow) -> LoginFlow {
    LoginFlow {
        id: row.get("id"),
        account_id: row.get("account_id"),
        token_id: row.get("token_id"),
        redirect_path: row.get("redirect_path"),
        phone: row.get("phone"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, claims: &ValidatedClaims) -> Result<TokenRecord> {
        let query = r"
            INSERT INTO handoff_tokens (id, claims)
            VALUES ($1, $2)
            RETURNING id, claims, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(Json(claims))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert handoff token")?;

        token_from_row(&row)
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>> {
        let query = "SELECT id, claims, created_at FROM handoff_tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup handoff token")?;

        row.as_ref().map(token_from_row).transpose()
    }

    async fn reclaim_tokens(&self, created_before: DateTime<Utc>) -> Result<u64> {
        let query = r"
            DELETE FROM handoff_tokens t
            WHERE t.created_at < $1
              AND NOT EXISTS (SELECT 1 FROM registration_flows f WHERE f.token_id = t.id)
              AND NOT EXISTS (SELECT 1 FROM login_flows l WHERE l.token_id = t.id)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(created_before)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reclaim expired handoff tokens")?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FlowStore for PgStore {
    async fn replace_flow(&self, flow: NewRegistrationFlow) -> Result<RegistrationFlow> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to start registration transaction")?;

        // Serializes concurrent starts for one token until commit.
        if let Some(token_id) = flow.token_id {
            let query = "SELECT id FROM handoff_tokens WHERE id = $1 FOR UPDATE";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(token_id)
                .fetch_optional(&mut *tx)
                .instrument(span)
                .await
                .context("failed to lock handoff token")?;
        }

        let query = "DELETE FROM registration_flows WHERE token_id = $1 OR id = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(flow.token_id)
            .bind(flow.supersedes)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to evict previous registration flows")?;

        let query = format!(
            r"
            INSERT INTO registration_flows
                (id, state, email, password_hash, phone, previous_url, token_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {FLOW_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(flow.state.as_str())
            .bind(&flow.email)
            .bind(flow.password_hash.expose_secret())
            .bind(&flow.phone)
            .bind(&flow.previous_url)
            .bind(flow.token_id)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert registration flow")?;

        tx.commit()
            .await
            .context("failed to commit registration flow")?;

        flow_from_row(&row)
    }

    async fn touch_flow(&self, id: Uuid) -> Result<Option<RegistrationFlow>> {
        let query = format!(
            "UPDATE registration_flows SET touched_at = NOW() WHERE id = $1 RETURNING {FLOW_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch registration flow")?;

        row.as_ref().map(flow_from_row).transpose()
    }

    async fn find_flow(&self, id: Uuid) -> Result<Option<RegistrationFlow>> {
        let query = format!("SELECT {FLOW_COLUMNS} FROM registration_flows WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup registration flow")?;

        row.as_ref().map(flow_from_row).transpose()
    }

    async fn update_flow(&self, id: Uuid, update: FlowUpdate) -> Result<Option<RegistrationFlow>> {
        let (assignment, guard) = match &update {
            FlowUpdate::Advance { .. } => ("state = $2", " AND state = $3"),
            FlowUpdate::Phone(_) => ("phone = $2", ""),
            FlowUpdate::CookieConsent(_) => ("cookie_consent = $2", ""),
            FlowUpdate::FeedbackConsent(_) => ("feedback_consent = $2", ""),
            FlowUpdate::TransitionEmails { .. } => (
                "yes_to_emails = $2, state = 'finish'",
                " AND state = 'transition_emails'",
            ),
        };
        let query = format!(
            "UPDATE registration_flows SET {assignment}, touched_at = NOW() WHERE id = $1{guard} RETURNING {FLOW_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );

        let prepared = sqlx::query(&query).bind(id);
        let prepared = match &update {
            FlowUpdate::Advance { from, to } => prepared.bind(to.as_str()).bind(from.as_str()),
            FlowUpdate::Phone(phone) => prepared.bind(phone.as_str()),
            FlowUpdate::CookieConsent(value) | FlowUpdate::FeedbackConsent(value) => {
                prepared.bind(*value)
            }
            FlowUpdate::TransitionEmails { yes_to_emails } => prepared.bind(*yes_to_emails),
        };
        let row = prepared
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update registration flow")?;

        row.as_ref().map(flow_from_row).transpose()
    }

    async fn delete_flow(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM registration_flows WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete registration flow")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_idle_flows(&self, touched_before: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM registration_flows WHERE touched_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(touched_before)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete idle registration flows")?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LoginFlowStore for PgStore {
    async fn insert_login_flow(&self, flow: NewLoginFlow) -> Result<LoginFlow> {
        let query = r"
            INSERT INTO login_flows (id, account_id, token_id, redirect_path, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, account_id, token_id, redirect_path, phone, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(flow.account_id)
            .bind(flow.token_id)
            .bind(&flow.redirect_path)
            .bind(&flow.phone)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert login flow")?;

        Ok(login_flow_from_row(&row))
    }

    async fn find_login_flow(&self, id: Uuid) -> Result<Option<LoginFlow>> {
        let query = r"
            SELECT id, account_id, token_id, redirect_path, phone, created_at
            FROM login_flows
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup login flow")?;

        Ok(row.as_ref().map(login_flow_from_row))
    }

    async fn delete_login_flow(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM login_flows WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete login flow")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale_login_flows(&self, created_before: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM login_flows WHERE created_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(created_before)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete stale login flows")?;

        Ok(result.rows_affected())
    }
}
