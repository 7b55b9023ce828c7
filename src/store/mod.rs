//! Persistence for handoff tokens and the flows that reference them.
//!
//! A token is the server-side record of a validated assertion. Registration
//! and login flows hold a reference to it while the visitor is mid-flow; the
//! reclaimer only removes tokens that no flow references.

#[cfg(test)]
pub(crate) mod memory;
mod postgres;

pub use postgres::PgStore;

use crate::{jwt::ValidatedClaims, registration::FlowState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: Uuid,
    pub claims: ValidatedClaims,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, claims: &ValidatedClaims) -> Result<TokenRecord>;
    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>>;
    /// Delete tokens created before `created_before` that no registration or
    /// login flow references. Returns the number removed.
    async fn reclaim_tokens(&self, created_before: DateTime<Utc>) -> Result<u64>;
}

/// Persisted progress of one visitor through registration.
#[derive(Debug, Clone)]
pub struct RegistrationFlow {
    pub id: Uuid,
    pub state: FlowState,
    pub email: String,
    pub password_hash: SecretString,
    pub phone: Option<String>,
    pub cookie_consent: Option<bool>,
    pub feedback_consent: Option<bool>,
    pub yes_to_emails: Option<bool>,
    pub previous_url: Option<String>,
    pub token_id: Option<Uuid>,
    pub touched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRegistrationFlow {
    pub state: FlowState,
    pub email: String,
    pub password_hash: SecretString,
    pub phone: Option<String>,
    pub previous_url: Option<String>,
    pub token_id: Option<Uuid>,
    /// Flow the visitor was already in, removed along with any flow for the
    /// same token.
    pub supersedes: Option<Uuid>,
}

/// Single-column updates. Each one is applied atomically so concurrent
/// submissions for different fields do not overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowUpdate {
    /// Move from `from` to `to`; not applied once the flow has left `from`.
    Advance { from: FlowState, to: FlowState },
    Phone(String),
    CookieConsent(bool),
    FeedbackConsent(bool),
    /// Records the email decision and moves the flow from
    /// `transition_emails` to `finish`.
    TransitionEmails { yes_to_emails: bool },
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert a flow, deleting in the same transaction any flow bound to the
    /// same token or named by `supersedes`.
    async fn replace_flow(&self, flow: NewRegistrationFlow) -> Result<RegistrationFlow>;
    /// Load a flow and refresh its activity timestamp.
    async fn touch_flow(&self, id: Uuid) -> Result<Option<RegistrationFlow>>;
    async fn find_flow(&self, id: Uuid) -> Result<Option<RegistrationFlow>>;
    /// Returns `None` when the flow is gone or, for state changes, no longer
    /// at the step the change starts from.
    async fn update_flow(&self, id: Uuid, update: FlowUpdate) -> Result<Option<RegistrationFlow>>;
    /// Returns whether a flow was removed.
    async fn delete_flow(&self, id: Uuid) -> Result<bool>;
    async fn delete_idle_flows(&self, touched_before: DateTime<Utc>) -> Result<u64>;
}

/// Login waiting on a phone code.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_id: Option<Uuid>,
    pub redirect_path: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLoginFlow {
    pub account_id: Uuid,
    pub token_id: Option<Uuid>,
    pub redirect_path: String,
    pub phone: String,
}

#[async_trait]
pub trait LoginFlowStore: Send + Sync {
    async fn insert_login_flow(&self, flow: NewLoginFlow) -> Result<LoginFlow>;
    async fn find_login_flow(&self, id: Uuid) -> Result<Option<LoginFlow>>;
    async fn delete_login_flow(&self, id: Uuid) -> Result<bool>;
    async fn delete_stale_login_flows(&self, created_before: DateTime<Utc>) -> Result<u64>;
}
