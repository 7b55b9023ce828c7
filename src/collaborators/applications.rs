//! OAuth application registry: registered applications, their granted scopes,
//! their ES256 verification keys, and the access tokens that identify them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: Uuid,
    pub uid: String,
    pub name: String,
    pub scopes: BTreeSet<String>,
}

impl Application {
    #[must_use]
    pub const fn granted_scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationKey {
    pub key_id: String,
    pub pem: String,
}

#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    async fn find_application(&self, uid: &str) -> Result<Option<Application>>;
    async fn find_application_by_id(&self, id: Uuid) -> Result<Option<Application>>;
    async fn find_key(
        &self,
        application: &Application,
        key_id: &str,
    ) -> Result<Option<ApplicationKey>>;
    /// Resolve a live bearer token to the application it was issued to.
    async fn application_for_access_token(&self, token: &str) -> Result<Option<Uuid>>;
}

/// Access tokens are looked up by digest; raw values never reach the database.
pub(crate) fn hash_access_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub struct PgApplicationRegistry {
    pool: PgPool,
}

impl PgApplicationRegistry {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn application_from_row(row: &sqlx::postgres::PgRow) -> Application {
        let scopes: String = row.get("scopes");
        Application {
            id: row.get("id"),
            uid: row.get("uid"),
            name: row.get("name"),
            scopes: scopes.split_whitespace().map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl ApplicationRegistry for PgApplicationRegistry {
    async fn find_application(&self, uid: &str) -> Result<Option<Application>> {
        let query = "SELECT id, uid, name, scopes FROM oauth_applications WHERE uid = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(uid)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup application by uid")?;

        Ok(row.as_ref().map(Self::application_from_row))
    }

    async fn find_application_by_id(&self, id: Uuid) -> Result<Option<Application>> {
        let query = "SELECT id, uid, name, scopes FROM oauth_applications WHERE id = $1";
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
            .context("failed to lookup application by id")?;

        Ok(row.as_ref().map(Self::application_from_row))
    }

    async fn find_key(
        &self,
        application: &Application,
        key_id: &str,
    ) -> Result<Option<ApplicationKey>> {
        let query = r"
            SELECT key_id, pem
            FROM application_keys
            WHERE application_id = $1 AND key_id = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(application.id)
            .bind(key_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup application key")?;

        Ok(row.map(|row| ApplicationKey {
            key_id: row.get("key_id"),
            pem: row.get("pem"),
        }))
    }

    async fn application_for_access_token(&self, token: &str) -> Result<Option<Uuid>> {
        let query = r"
            SELECT application_id
            FROM oauth_access_tokens
            WHERE token_hash = $1
              AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > NOW())
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_access_token(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup access token")?;

        Ok(row.map(|row| row.get("application_id")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_hash_is_sha256() {
        let digest = hash_access_token("secret");
        assert_eq!(digest.len(), 32);
        assert_eq!(digest, hash_access_token("secret"));
        assert_ne!(digest, hash_access_token("Secret"));
    }

    #[test]
    fn granted_scopes_are_exposed() {
        let application = Application {
            id: Uuid::nil(),
            uid: "uid".to_string(),
            name: "checker".to_string(),
            scopes: ["test_scope_write".to_string()].into_iter().collect(),
        };
        assert!(application.granted_scopes().contains("test_scope_write"));
    }
}
