//! Security activity log for account events.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{Instrument, debug};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    UserCreated,
    Login,
}

impl AuditEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserCreated => "user_created",
            Self::Login => "login",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub account_id: Uuid,
    pub application_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: AuditEventKind, account_id: Uuid) -> Self {
        Self {
            kind,
            account_id,
            application_id: None,
            ip_address: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_application(mut self, application_id: Option<Uuid>) -> Self {
        self.application_id = application_id;
        self
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    /// Same kind, account, application and address within a minute of each
    /// other.
    #[must_use]
    pub fn very_similar_to(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.account_id == other.account_id
            && self.application_id == other.application_id
            && self.ip_address == other.ip_address
            && (self.created_at - other.created_at).abs() <= Duration::seconds(60)
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event unless a very similar one was just recorded.
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn latest(&self, event: &AuditEvent) -> Result<Option<AuditEvent>> {
        let query = r"
            SELECT application_id, ip_address, created_at
            FROM security_activities
            WHERE account_id = $1 AND event_type = $2
            ORDER BY created_at DESC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(event.account_id)
            .bind(event.kind.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup latest security activity")?;

        Ok(row.map(|row| AuditEvent {
            kind: event.kind,
            account_id: event.account_id,
            application_id: row.get("application_id"),
            ip_address: row.get("ip_address"),
            created_at: row.get("created_at"),
        }))
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        if let Some(latest) = self.latest(&event).await?
            && latest.very_similar_to(&event)
        {
            debug!(kind = event.kind.as_str(), "skipping duplicate security activity");
            return Ok(());
        }

        let query = r"
            INSERT INTO security_activities
                (id, account_id, event_type, application_id, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(event.account_id)
            .bind(event.kind.as_str())
            .bind(event.application_id)
            .bind(&event.ip_address)
            .bind(event.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert security activity")?;

        Ok(())
    }
}
