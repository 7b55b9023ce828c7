//! Sign-in for returning visitors, with an optional SMS code step, and the
//! welcome check that routes an email to login or registration.

use crate::{
    collaborators::{
        AccountStore, AuditEvent, AuditEventKind, AuditSink, CodeOutcome, MfaProvider,
    },
    jwt::redirect::absolute_from_base,
    registration::{FieldErrors, normalize_email, valid_email},
    store::{LoginFlowStore, NewLoginFlow, TokenRecord, TokenStore},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Where a visitor lands after login when no handoff says otherwise.
pub const DEFAULT_LOGIN_PATH: &str = "/account";

#[derive(Clone, Debug)]
pub struct LoginConfig {
    mfa_enabled: bool,
    trusted_base_url: String,
}

impl LoginConfig {
    #[must_use]
    pub fn new(trusted_base_url: impl Into<String>) -> Self {
        Self {
            mfa_enabled: false,
            trusted_base_url: trusted_base_url.into(),
        }
    }

    #[must_use]
    pub const fn with_mfa_enabled(mut self, mfa_enabled: bool) -> Self {
        self.mfa_enabled = mfa_enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WelcomeOutcome {
    Login,
    Register,
    Invalid(FieldErrors),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The login flow is gone; the visitor signs in again.
    Restart,
    Invalid(FieldErrors),
    PhoneCodeRequired { login_flow_id: Uuid },
    Complete { account_id: Uuid, redirect: String },
}

pub struct Login {
    config: LoginConfig,
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<dyn TokenStore>,
    logins: Arc<dyn LoginFlowStore>,
    mfa: Arc<dyn MfaProvider>,
    audit: Arc<dyn AuditSink>,
}

impl Login {
    #[must_use]
    pub fn new(
        config: LoginConfig,
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<dyn TokenStore>,
        logins: Arc<dyn LoginFlowStore>,
        mfa: Arc<dyn MfaProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            accounts,
            tokens,
            logins,
            mfa,
            audit,
        }
    }

    /// # Errors
    /// Returns an error if the account store cannot be queried.
    pub async fn welcome(&self, email: &str) -> Result<WelcomeOutcome> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(WelcomeOutcome::Invalid(FieldErrors::single(
                "email", "invalid",
            )));
        }
        if self.accounts.exists(&email).await? {
            Ok(WelcomeOutcome::Login)
        } else {
            Ok(WelcomeOutcome::Register)
        }
    }

    /// Check credentials. When MFA is on and the account has a phone, a code
    /// is sent and the login waits on it.
    ///
    /// # Errors
    /// Returns an error if a store or the MFA provider fails.
    pub async fn login(
        &self,
        token_id: Option<Uuid>,
        email: &str,
        password: &SecretString,
        ip_address: Option<String>,
    ) -> Result<LoginOutcome> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.authenticate(&email, password).await? else {
            info!("login refused");
            return Ok(LoginOutcome::Invalid(FieldErrors::single(
                "password",
                "incorrect",
            )));
        };

        let token = match token_id {
            Some(id) => self.tokens.find_token(id).await?,
            None => None,
        };
        let redirect_path = token.as_ref().map_or_else(
            || DEFAULT_LOGIN_PATH.to_string(),
            |token| token.claims.post_login_oauth.clone(),
        );

        if self.config.mfa_enabled
            && let Some(phone) = account.phone
        {
            let flow = self
                .logins
                .insert_login_flow(NewLoginFlow {
                    account_id: account.id,
                    token_id: token.as_ref().map(|token| token.id),
                    redirect_path,
                    phone,
                })
                .await?;
            self.mfa
                .generate_and_send_code(flow.id, &flow.phone)
                .await?;
            return Ok(LoginOutcome::PhoneCodeRequired {
                login_flow_id: flow.id,
            });
        }

        Ok(self
            .complete(account.id, &redirect_path, token.as_ref(), ip_address)
            .await)
    }

    /// Finish a login that is waiting on an SMS code.
    ///
    /// # Errors
    /// Returns an error if a store or the MFA provider fails.
    pub async fn verify_phone(
        &self,
        login_flow_id: Option<Uuid>,
        code: &str,
        ip_address: Option<String>,
    ) -> Result<LoginOutcome> {
        let Some(flow_id) = login_flow_id else {
            return Ok(LoginOutcome::Restart);
        };
        let Some(flow) = self.logins.find_login_flow(flow_id).await? else {
            return Ok(LoginOutcome::Restart);
        };

        let outcome = self.mfa.verify_code(flow.id, code.trim()).await?;
        if outcome != CodeOutcome::Ok {
            let message = format!("mfa.errors.phone_code.{}", outcome.as_str());
            return Ok(LoginOutcome::Invalid(FieldErrors::single(
                "phone_code",
                &message,
            )));
        }

        let token = match flow.token_id {
            Some(id) => self.tokens.find_token(id).await?,
            None => None,
        };
        self.logins.delete_login_flow(flow.id).await?;

        Ok(self
            .complete(flow.account_id, &flow.redirect_path, token.as_ref(), ip_address)
            .await)
    }

    async fn complete(
        &self,
        account_id: Uuid,
        redirect_path: &str,
        token: Option<&TokenRecord>,
        ip_address: Option<String>,
    ) -> LoginOutcome {
        let event = AuditEvent::new(AuditEventKind::Login, account_id)
            .with_application(token.map(|token| token.claims.application_id))
            .with_ip_address(ip_address);
        if let Err(err) = self.audit.record(event).await {
            error!(%account_id, "failed to record security activity: {err:#}");
        }

        info!(%account_id, "login complete");
        LoginOutcome::Complete {
            account_id,
            redirect: absolute_from_base(redirect_path, &self.config.trusted_base_url),
        }
    }
}
