use super::{
    Confirmation, CookiePreferences, Entered, FieldErrors, FlowState, Registration, StepOutcome,
    parse_decision,
};
use crate::{
    collaborators::{
        Account, AuditEvent, AuditEventKind, CodeOutcome, CreateOutcome, NewAccount,
        attribute_service::dispatch_attributes, mfa::e164_number,
    },
    jwt::ValidatedClaims,
    store::FlowUpdate,
};
use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

impl Registration {
    /// Check the SMS code sent at `start`.
    ///
    /// # Errors
    /// Returns an error if a store or the MFA provider fails.
    pub async fn phone_code(&self, flow_id: Option<Uuid>, code: &str) -> Result<StepOutcome> {
        let flow = match self.enter(flow_id, FlowState::Phone).await? {
            Entered::Ready(flow) => flow,
            Entered::Elsewhere(outcome) => return Ok(outcome),
        };

        let outcome = self.mfa.verify_code(flow.id, code.trim()).await?;
        if outcome != CodeOutcome::Ok {
            let message = format!("mfa.errors.phone_code.{}", outcome.as_str());
            return Ok(StepOutcome::Redisplay {
                state: FlowState::Phone,
                errors: FieldErrors::single("phone_code", &message),
            });
        }

        if let Some(outcome) = self
            .advance(flow.id, FlowState::Phone, FlowState::YourInformation)
            .await?
        {
            return Ok(outcome);
        }
        info!(flow_id = %flow.id, "registration phone verified");
        Ok(StepOutcome::Advance {
            next: FlowState::YourInformation,
            preferences: None,
        })
    }

    /// Send a new code, optionally to a corrected number.
    ///
    /// # Errors
    /// Returns an error if a store or the MFA provider fails.
    pub async fn phone_resend(
        &self,
        flow_id: Option<Uuid>,
        phone: Option<&str>,
    ) -> Result<StepOutcome> {
        let flow = match self.enter(flow_id, FlowState::Phone).await? {
            Entered::Ready(flow) => flow,
            Entered::Elsewhere(outcome) => return Ok(outcome),
        };

        let requested = phone
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .or(flow.phone.as_deref());
        let Some(phone) = requested.and_then(e164_number) else {
            return Ok(StepOutcome::Redisplay {
                state: FlowState::Phone,
                errors: FieldErrors::single("phone", "invalid"),
            });
        };

        self.flows
            .update_flow(flow.id, FlowUpdate::Phone(phone.clone()))
            .await?;
        self.mfa.generate_and_send_code(flow.id, &phone).await?;

        Ok(StepOutcome::Advance {
            next: FlowState::Phone,
            preferences: None,
        })
    }

    /// Record cookie and feedback consent. Each valid answer is saved on its
    /// own; the step completes once both are on record.
    ///
    /// # Errors
    /// Returns an error if a store cannot be queried.
    pub async fn your_information(
        &self,
        flow_id: Option<Uuid>,
        cookie_consent: Option<&str>,
        feedback_consent: Option<&str>,
    ) -> Result<StepOutcome> {
        let flow = match self.enter(flow_id, FlowState::YourInformation).await? {
            Entered::Ready(flow) => flow,
            Entered::Elsewhere(outcome) => return Ok(outcome),
        };

        let mut errors = FieldErrors::new();
        match parse_decision(cookie_consent) {
            Some(value) => {
                self.flows
                    .update_flow(flow.id, FlowUpdate::CookieConsent(value))
                    .await?;
            }
            None => errors.add("cookie_consent", "invalid"),
        }
        match parse_decision(feedback_consent) {
            Some(value) => {
                self.flows
                    .update_flow(flow.id, FlowUpdate::FeedbackConsent(value))
                    .await?;
            }
            None => errors.add("feedback_consent", "invalid"),
        }

        // Another request may have recorded the other answer meanwhile.
        let Some(latest) = self.flows.find_flow(flow.id).await? else {
            return Ok(StepOutcome::Restart);
        };
        let (Some(usage), Some(_)) = (latest.cookie_consent, latest.feedback_consent) else {
            return Ok(StepOutcome::Redisplay {
                state: FlowState::YourInformation,
                errors,
            });
        };

        let next = if self.email_topic_slug(&latest).await?.is_some() {
            FlowState::TransitionEmails
        } else {
            FlowState::Finish
        };
        if let Some(outcome) = self
            .advance(flow.id, FlowState::YourInformation, next)
            .await?
        {
            return Ok(outcome);
        }

        Ok(StepOutcome::Advance {
            next,
            preferences: Some(CookiePreferences { usage }),
        })
    }

    /// Record whether the visitor wants email about the handoff's topic.
    ///
    /// # Errors
    /// Returns an error if a store cannot be queried.
    pub async fn transition_emails(
        &self,
        flow_id: Option<Uuid>,
        decision: Option<&str>,
    ) -> Result<StepOutcome> {
        let flow = match self.enter(flow_id, FlowState::TransitionEmails).await? {
            Entered::Ready(flow) => flow,
            Entered::Elsewhere(outcome) => return Ok(outcome),
        };

        let Some(yes_to_emails) = parse_decision(decision) else {
            return Ok(StepOutcome::Redisplay {
                state: FlowState::TransitionEmails,
                errors: FieldErrors::single("email_decision", "invalid"),
            });
        };

        if self
            .flows
            .update_flow(flow.id, FlowUpdate::TransitionEmails { yes_to_emails })
            .await?
            .is_none()
        {
            return self.moved_on(flow.id).await;
        }

        Ok(StepOutcome::Advance {
            next: FlowState::Finish,
            preferences: None,
        })
    }

    /// Create the account, hand over granted attributes, subscribe to the
    /// topic if asked, and close the flow.
    ///
    /// # Errors
    /// Returns an error if the account cannot be created. Failures after
    /// that are logged and the account is still confirmed.
    pub async fn finish(
        &self,
        flow_id: Option<Uuid>,
        ip_address: Option<String>,
    ) -> Result<StepOutcome> {
        let flow = match self.enter(flow_id, FlowState::Finish).await? {
            Entered::Ready(flow) => flow,
            Entered::Elsewhere(outcome) => return Ok(outcome),
        };

        let token = self.token(flow.token_id).await?;
        let new_account = NewAccount {
            email: flow.email.clone(),
            password_hash: flow.password_hash.clone(),
            phone: flow.phone.clone(),
            last_mfa_success: flow.phone.as_ref().map(|_| Utc::now()),
            cookie_consent: flow.cookie_consent.unwrap_or(false),
            feedback_consent: flow.feedback_consent.unwrap_or(false),
        };

        let account = match self.accounts.create(new_account).await? {
            CreateOutcome::Created(account) => account,
            CreateOutcome::Invalid(errors) => {
                return Ok(StepOutcome::Redisplay {
                    state: FlowState::Finish,
                    errors,
                });
            }
        };

        // Past this point the account exists: failures are logged and the
        // flow still closes.
        if let Some(token) = &token {
            if let Err(err) = self.persist_attributes(&account, &token.claims).await {
                error!(account_id = %account.id, "failed to grant application access: {err:#}");
            }
            if flow.yes_to_emails == Some(true)
                && let Some(slug) = token.claims.email_topic_slug()
                && let Err(err) = self.accounts.subscribe(account.id, &slug).await
            {
                error!(account_id = %account.id, topic_slug = %slug, "failed to subscribe to email topic: {err:#}");
            }
        }

        if let Err(err) = self.flows.delete_flow(flow.id).await {
            error!(flow_id = %flow.id, "failed to close registration flow: {err:#}");
        }

        let event = AuditEvent::new(AuditEventKind::UserCreated, account.id)
            .with_application(token.as_ref().map(|token| token.claims.application_id))
            .with_ip_address(ip_address);
        if let Err(err) = self.audit.record(event).await {
            error!(account_id = %account.id, "failed to record security activity: {err:#}");
        }

        info!(account_id = %account.id, flow_id = %flow.id, "account created");
        Ok(StepOutcome::Created(Confirmation {
            account_id: account.id,
            email: account.email,
            user_is_confirmed: false,
            user_is_new: true,
            previous_url: flow.previous_url,
        }))
    }

    /// Move the flow from `from` to `to`. Returns where to send the visitor
    /// instead when another request already moved it.
    async fn advance(
        &self,
        flow_id: Uuid,
        from: FlowState,
        to: FlowState,
    ) -> Result<Option<StepOutcome>> {
        let updated = self
            .flows
            .update_flow(flow_id, FlowUpdate::Advance { from, to })
            .await?;
        match updated {
            Some(_) => Ok(None),
            None => self.moved_on(flow_id).await.map(Some),
        }
    }

    async fn moved_on(&self, flow_id: Uuid) -> Result<StepOutcome> {
        Ok(match self.flows.find_flow(flow_id).await? {
            Some(flow) => {
                debug!(%flow_id, state = flow.state.as_str(), "registration flow moved on");
                StepOutcome::Redirect(flow.state)
            }
            None => StepOutcome::Restart,
        })
    }

    /// Grant the handing-over application access before any attribute is
    /// sent, then send attributes without waiting on the result.
    async fn persist_attributes(&self, account: &Account, claims: &ValidatedClaims) -> Result<()> {
        if claims.scopes.is_empty() {
            return Ok(());
        }

        let grant_id = self
            .accounts
            .grant_access(account.id, claims.application_id, &claims.scopes)
            .await?;

        if !claims.attributes.is_empty() {
            dispatch_attributes(self.attributes.clone(), grant_id, claims.attributes.clone());
        }
        Ok(())
    }
}
