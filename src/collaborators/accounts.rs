//! Account records, password hashing, OAuth access grants and email topic
//! subscriptions.

use crate::registration::FieldErrors;
use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tracing::{Instrument, error};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: SecretString,
    pub phone: Option<String>,
    pub last_mfa_success: Option<DateTime<Utc>>,
    pub cookie_consent: bool,
    pub feedback_consent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Account),
    Invalid(FieldErrors),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn exists(&self, email: &str) -> Result<bool>;
    async fn create(&self, account: NewAccount) -> Result<CreateOutcome>;
    async fn authenticate(&self, email: &str, password: &SecretString) -> Result<Option<Account>>;
    /// Issue an access grant so `application_id` may act for the account with
    /// `scopes`. Returns the grant id.
    async fn grant_access(
        &self,
        account_id: Uuid,
        application_id: Uuid,
        scopes: &BTreeSet<String>,
    ) -> Result<Uuid>;
    async fn subscribe(&self, account_id: Uuid, topic_slug: &str) -> Result<()>;
}

/// Hash a password with Argon2id and a random salt.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &SecretString) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Check a password against a stored Argon2 hash.
#[must_use]
pub fn verify_password(password: &SecretString, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn exists(&self, email: &str) -> Result<bool> {
        let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1) AS present";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check account email")?;

        Ok(row.get("present"))
    }

    async fn create(&self, account: NewAccount) -> Result<CreateOutcome> {
        let query = r"
            INSERT INTO accounts
                (id, email, password_hash, phone, last_mfa_success_at, cookie_consent, feedback_consent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, email, phone
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(&account.email)
            .bind(account.password_hash.expose_secret())
            .bind(&account.phone)
            .bind(account.last_mfa_success)
            .bind(account.cookie_consent)
            .bind(account.feedback_consent)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(CreateOutcome::Created(Account {
                id: row.get("id"),
                email: row.get("email"),
                phone: row.get("phone"),
            })),
            Err(err) if is_unique_violation(&err) => {
                Ok(CreateOutcome::Invalid(FieldErrors::single("email", "taken")))
            }
            Err(err) => {
                error!("Failed to insert account: {err}");
                Err(err).context("failed to insert account")
            }
        }
    }

    async fn authenticate(&self, email: &str, password: &SecretString) -> Result<Option<Account>> {
        let query = "SELECT id, email, phone, password_hash FROM accounts WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account for login")?;

        Ok(row.and_then(|row| {
            let stored: String = row.get("password_hash");
            verify_password(password, &stored).then(|| Account {
                id: row.get("id"),
                email: row.get("email"),
                phone: row.get("phone"),
            })
        }))
    }

    async fn grant_access(
        &self,
        account_id: Uuid,
        application_id: Uuid,
        scopes: &BTreeSet<String>,
    ) -> Result<Uuid> {
        let query = r"
            INSERT INTO access_grants (id, account_id, application_id, scopes)
            VALUES ($1, $2, $3, $4)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let scopes = scopes.iter().cloned().collect::<Vec<_>>().join(" ");
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(account_id)
            .bind(application_id)
            .bind(scopes)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert access grant")?;

        Ok(row.get("id"))
    }

    async fn subscribe(&self, account_id: Uuid, topic_slug: &str) -> Result<()> {
        let query = r"
            INSERT INTO email_subscriptions (account_id, topic_slug)
            VALUES ($1, $2)
            ON CONFLICT (account_id, topic_slug) DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(topic_slug)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert email subscription")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() -> Result<()> {
        let password = SecretString::from("breadbox1");
        let hash = hash_password(&password)?;

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&password, &hash));
        assert!(!verify_password(&SecretString::from("breadbox2"), &hash));
        assert!(!verify_password(&password, "not-a-hash"));
        Ok(())
    }

    #[test]
    fn unique_violation_requires_database_error() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
