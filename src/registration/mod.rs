//! Multi-step registration.
//!
//! A visitor, optionally arriving with a handoff token, walks
//! `start -> phone -> your_information -> transition_emails -> finish`.
//! Progress is persisted per flow; each step only acts when the flow is at
//! that step and otherwise sends the visitor to where the flow actually is.
//! The phone step is skipped when MFA is off, and the transition emails step
//! when the handoff carried no email topic.

mod fields;
mod state;
mod steps;

pub use fields::{
    FieldErrors, MIN_PASSWORD_LENGTH, normalize_email, parse_decision, password_problems,
    valid_email,
};
pub use state::FlowState;

use crate::{
    collaborators::{
        AccountStore, AttributeService, AuditSink, MfaProvider, accounts::hash_password,
        mfa::e164_number,
    },
    jwt::redirect::absolute_from_base,
    store::{FlowStore, NewRegistrationFlow, RegistrationFlow, TokenRecord, TokenStore},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    enabled: bool,
    mfa_enabled: bool,
    trusted_base_url: String,
}

impl RegistrationConfig {
    #[must_use]
    pub fn new(trusted_base_url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            mfa_enabled: false,
            trusted_base_url: trusted_base_url.into(),
        }
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_mfa_enabled(mut self, mfa_enabled: bool) -> Self {
        self.mfa_enabled = mfa_enabled;
        self
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn mfa_enabled(&self) -> bool {
        self.mfa_enabled
    }

    #[must_use]
    pub fn trusted_base_url(&self) -> &str {
        &self.trusted_base_url
    }
}

/// Everything registration reads from or writes to.
pub struct Collaborators {
    pub flows: Arc<dyn FlowStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub mfa: Arc<dyn MfaProvider>,
    pub attributes: Arc<dyn AttributeService>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct Registration {
    config: RegistrationConfig,
    flows: Arc<dyn FlowStore>,
    tokens: Arc<dyn TokenStore>,
    accounts: Arc<dyn AccountStore>,
    mfa: Arc<dyn MfaProvider>,
    attributes: Arc<dyn AttributeService>,
    audit: Arc<dyn AuditSink>,
}

pub struct StartRequest {
    pub email: String,
    pub password: SecretString,
    pub phone: Option<String>,
    pub previous_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Closed,
    Invalid(FieldErrors),
    Started { flow_id: Uuid, next: FlowState },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StartView {
    pub registration_open: bool,
    pub mfa_enabled: bool,
    pub criteria_keys: Vec<String>,
}

/// What a visitor sees on the step their flow is at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FlowView {
    pub state: FlowState,
    pub email: String,
    pub phone: Option<String>,
    pub cookie_consent: Option<bool>,
    pub feedback_consent: Option<bool>,
    pub yes_to_emails: Option<bool>,
    pub email_topic_slug: Option<String>,
}

/// Cookie preferences to mirror to the browser once consent is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePreferences {
    pub usage: bool,
}

impl CookiePreferences {
    #[must_use]
    pub fn policy_json(self) -> String {
        json!({
            "essential": true,
            "settings": false,
            "usage": self.usage,
            "campaigns": false,
        })
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Confirmation {
    pub account_id: Uuid,
    pub email: String,
    pub user_is_confirmed: bool,
    pub user_is_new: bool,
    pub previous_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// No live flow; the visitor starts over.
    Restart,
    /// The flow is at another step.
    Redirect(FlowState),
    Advance {
        next: FlowState,
        preferences: Option<CookiePreferences>,
    },
    Redisplay {
        state: FlowState,
        errors: FieldErrors,
    },
    Show(FlowView),
    Created(Confirmation),
}

enum Entered {
    Ready(RegistrationFlow),
    Elsewhere(StepOutcome),
}

/// Relative paths only; anything with a scheme or host is dropped.
fn local_path(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

impl Registration {
    #[must_use]
    pub fn new(config: RegistrationConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            flows: collaborators.flows,
            tokens: collaborators.tokens,
            accounts: collaborators.accounts,
            mfa: collaborators.mfa,
            attributes: collaborators.attributes,
            audit: collaborators.audit,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    async fn token(&self, token_id: Option<Uuid>) -> Result<Option<TokenRecord>> {
        match token_id {
            Some(id) => self.tokens.find_token(id).await,
            None => Ok(None),
        }
    }

    async fn email_topic_slug(&self, flow: &RegistrationFlow) -> Result<Option<String>> {
        Ok(self
            .token(flow.token_id)
            .await?
            .and_then(|token| token.claims.email_topic_slug()))
    }

    /// Load the flow and check it is at `step`.
    async fn enter(&self, flow_id: Option<Uuid>, step: FlowState) -> Result<Entered> {
        let Some(flow_id) = flow_id else {
            return Ok(Entered::Elsewhere(StepOutcome::Restart));
        };
        let Some(flow) = self.flows.touch_flow(flow_id).await? else {
            return Ok(Entered::Elsewhere(StepOutcome::Restart));
        };
        if flow.state == step {
            Ok(Entered::Ready(flow))
        } else {
            Ok(Entered::Elsewhere(StepOutcome::Redirect(flow.state)))
        }
    }

    /// # Errors
    /// Returns an error if the token store cannot be queried.
    pub async fn start_view(&self, token_id: Option<Uuid>) -> Result<StartView> {
        let criteria_keys = self
            .token(token_id)
            .await?
            .map(|token| token.claims.criteria_keys())
            .unwrap_or_default();
        Ok(StartView {
            registration_open: self.config.enabled,
            mfa_enabled: self.config.mfa_enabled,
            criteria_keys,
        })
    }

    /// Validate the visitor's details and open a flow, replacing any earlier
    /// flow for the same handoff token or the same browser.
    ///
    /// # Errors
    /// Returns an error if a store cannot be queried or hashing fails.
    pub async fn start(
        &self,
        token_id: Option<Uuid>,
        current_flow: Option<Uuid>,
        request: StartRequest,
    ) -> Result<StartOutcome> {
        if !self.config.enabled {
            return Ok(StartOutcome::Closed);
        }

        let email = normalize_email(&request.email);
        let mut errors = FieldErrors::new();
        if !valid_email(&email) {
            errors.add("email", "invalid");
        } else if self.accounts.exists(&email).await? {
            errors.add("email", "taken");
        }
        for problem in password_problems(request.password.expose_secret()) {
            errors.add("password", problem);
        }
        let phone = if self.config.mfa_enabled {
            let phone = request.phone.as_deref().and_then(e164_number);
            if phone.is_none() {
                errors.add("phone", "invalid");
            }
            phone
        } else {
            None
        };
        if !errors.is_empty() {
            return Ok(StartOutcome::Invalid(errors));
        }

        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .context("password hashing task failed")??;

        let token = self.token(token_id).await?;
        let previous_url = token
            .as_ref()
            .and_then(|token| token.claims.post_register_oauth.as_deref())
            .map(|path| absolute_from_base(path, &self.config.trusted_base_url))
            .or_else(|| request.previous_url.filter(|url| local_path(url)));
        let next = if phone.is_some() {
            FlowState::Phone
        } else {
            FlowState::YourInformation
        };

        let flow = self
            .flows
            .replace_flow(NewRegistrationFlow {
                state: next,
                email,
                password_hash: SecretString::from(password_hash),
                phone,
                previous_url,
                token_id: token.map(|token| token.id),
                supersedes: current_flow,
            })
            .await?;

        if let Some(phone) = &flow.phone
            && let Err(err) = self.mfa.generate_and_send_code(flow.id, phone).await
        {
            // The visitor can ask for another code from the phone step.
            error!(flow_id = %flow.id, "failed to send phone code: {err:#}");
        }

        info!(flow_id = %flow.id, state = next.as_str(), "registration started");
        Ok(StartOutcome::Started {
            flow_id: flow.id,
            next,
        })
    }

    /// Show `step` if the flow is there.
    ///
    /// # Errors
    /// Returns an error if a store cannot be queried.
    pub async fn view(&self, flow_id: Option<Uuid>, step: FlowState) -> Result<StepOutcome> {
        let flow = match self.enter(flow_id, step).await? {
            Entered::Ready(flow) => flow,
            Entered::Elsewhere(outcome) => return Ok(outcome),
        };
        let email_topic_slug = self.email_topic_slug(&flow).await?;
        Ok(StepOutcome::Show(FlowView {
            state: flow.state,
            email: flow.email,
            phone: flow.phone,
            cookie_consent: flow.cookie_consent,
            feedback_consent: flow.feedback_consent,
            yes_to_emails: flow.yes_to_emails,
            email_topic_slug,
        }))
    }

    /// Abandon the flow. Unknown or missing flows are ignored.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    pub async fn cancel(&self, flow_id: Option<Uuid>) -> Result<()> {
        if let Some(flow_id) = flow_id
            && self.flows.delete_flow(flow_id).await?
        {
            info!(%flow_id, "registration cancelled");
        }
        Ok(())
    }
}
