//! Exchange of a validated assertion for a server-side handoff token.

use crate::{
    collaborators::ApplicationRegistry,
    jwt::{HandoffError, Verifier},
    store::{TokenRecord, TokenStore},
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Tokens older than this, and unreferenced by any flow, are reclaimed.
pub const DEFAULT_EXPIRATION_SECONDS: i64 = 3600;

#[derive(Clone, Debug)]
pub struct HandoffConfig {
    trusted_base_url: String,
    expiration_seconds: i64,
}

impl HandoffConfig {
    #[must_use]
    pub fn new(trusted_base_url: impl Into<String>) -> Self {
        Self {
            trusted_base_url: trusted_base_url.into(),
            expiration_seconds: DEFAULT_EXPIRATION_SECONDS,
        }
    }

    #[must_use]
    pub const fn with_expiration_seconds(mut self, seconds: i64) -> Self {
        self.expiration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn trusted_base_url(&self) -> &str {
        &self.trusted_base_url
    }

    #[must_use]
    pub const fn expiration_seconds(&self) -> i64 {
        self.expiration_seconds
    }
}

pub struct Handoff {
    config: HandoffConfig,
    registry: Arc<dyn ApplicationRegistry>,
    tokens: Arc<dyn TokenStore>,
}

impl Handoff {
    #[must_use]
    pub fn new(
        config: HandoffConfig,
        registry: Arc<dyn ApplicationRegistry>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            registry,
            tokens,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Validate `assertion` and persist its claims. The returned record's id
    /// is what the browser carries into registration or login.
    ///
    /// # Errors
    /// Returns the validation rejection, or a storage error.
    pub async fn create_token(
        &self,
        assertion: &str,
        trusted_application_id: Option<Uuid>,
    ) -> Result<TokenRecord, HandoffError> {
        let claims = Verifier::new(self.registry.as_ref(), &self.config.trusted_base_url)
            .validate(assertion, trusted_application_id)
            .await?;
        let record = self.tokens.insert_token(&claims).await?;

        info!(
            token_id = %record.id,
            application_id = %claims.application_id,
            "handoff token created"
        );
        Ok(record)
    }

    /// Resolve a bearer access token to the application it belongs to.
    ///
    /// # Errors
    /// Returns an error if the registry cannot be queried.
    pub async fn trusted_application(&self, access_token: &str) -> Result<Option<Uuid>> {
        self.registry
            .application_for_access_token(access_token)
            .await
    }

    /// # Errors
    /// Returns an error if the store cannot be queried.
    pub async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>> {
        self.tokens.find_token(id).await
    }

    /// Delete tokens older than the expiration age that no flow references.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::seconds(self.config.expiration_seconds);
        self.tokens.reclaim_tokens(cutoff).await
    }
}
