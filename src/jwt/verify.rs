//! Assertion verification: identify the issuing application, check the ES256
//! signature against its registered key, then authorize scopes, attributes and
//! redirects.

use super::{Attributes, HandoffError, Rejection, redirect::relative_to_base};
use crate::collaborators::applications::ApplicationRegistry;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Payload as the relying service sends it, before any check.
#[derive(Debug, Clone, Default, Deserialize)]
struct AssertionPayload {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
    #[serde(default)]
    post_login_oauth: Option<String>,
    #[serde(default)]
    post_register_oauth: Option<String>,
}

/// Key that verified the assertion. Absent when the caller was trusted by
/// bearer token and no signature was checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    pub key_id: String,
    pub pem: String,
}

/// Outcome of a successful validation. Redirects are kept relative to the
/// trusted base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedClaims {
    pub application_id: Uuid,
    pub signing_key: Option<SigningKey>,
    pub scopes: BTreeSet<String>,
    pub attributes: Attributes,
    pub post_login_oauth: String,
    pub post_register_oauth: Option<String>,
}

impl ValidatedClaims {
    #[must_use]
    pub fn email_topic_slug(&self) -> Option<String> {
        self.attributes
            .transition_checker_state()
            .and_then(|state| state.email_topic_slug)
            .filter(|slug| !slug.is_empty())
    }

    #[must_use]
    pub fn criteria_keys(&self) -> Vec<String> {
        self.attributes
            .transition_checker_state()
            .map(|state| state.criteria_keys)
            .unwrap_or_default()
    }
}

/// Validates inbound assertions against an application registry.
pub struct Verifier<'a> {
    registry: &'a dyn ApplicationRegistry,
    trusted_base_url: &'a str,
}

impl<'a> Verifier<'a> {
    #[must_use]
    pub const fn new(registry: &'a dyn ApplicationRegistry, trusted_base_url: &'a str) -> Self {
        Self {
            registry,
            trusted_base_url,
        }
    }

    /// Validate `assertion`. With `trusted_application_id` the caller already
    /// proved its identity, so the signature check is skipped and no signing
    /// key is attached to the result.
    ///
    /// # Errors
    /// Returns `HandoffError::Rejected` with the first failing check, or
    /// `HandoffError::Storage` when the registry cannot be queried.
    pub async fn validate(
        &self,
        assertion: &str,
        trusted_application_id: Option<Uuid>,
    ) -> Result<ValidatedClaims, HandoffError> {
        let unverified = peek_payload(assertion)?;
        let uid = present(unverified.uid.clone()).ok_or(Rejection::MissingFieldUid)?;
        let key_id = present(unverified.key.clone()).ok_or(Rejection::MissingFieldKey)?;

        let (application, signing_key, payload) = if let Some(id) = trusted_application_id {
            let application = self
                .registry
                .find_application_by_id(id)
                .await?
                .ok_or(Rejection::UidNotFound)?;
            debug!(application_id = %application.id, "skipping signature for trusted caller");
            (application, None, unverified)
        } else {
            let application = self
                .registry
                .find_application(&uid)
                .await?
                .ok_or(Rejection::UidNotFound)?;
            let key = self
                .registry
                .find_key(&application, &key_id)
                .await?
                .ok_or(Rejection::KeyNotFound)?;
            let payload = verify_signature(assertion, &key.pem)?;
            let signing_key = SigningKey {
                key_id: key.key_id,
                pem: key.pem,
            };
            (application, Some(signing_key), payload)
        };

        let post_login_oauth =
            present(payload.post_login_oauth).ok_or(Rejection::MissingFieldPostLoginOAuth)?;

        let scopes: BTreeSet<String> = payload.scopes.into_iter().collect();
        if !scopes.is_subset(application.granted_scopes()) {
            return Err(Rejection::InvalidScopes.into());
        }

        let attributes =
            Attributes::authorize(payload.attributes, &scopes).ok_or(Rejection::InsufficientScopes)?;

        let post_login_oauth = relative_to_base(&post_login_oauth, self.trusted_base_url)?;
        let post_register_oauth = present(payload.post_register_oauth)
            .map(|redirect| relative_to_base(&redirect, self.trusted_base_url))
            .transpose()?;

        Ok(ValidatedClaims {
            application_id: application.id,
            signing_key,
            scopes,
            attributes,
            post_login_oauth,
            post_register_oauth,
        })
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Decode the payload segment without checking the signature. The uid and key
/// it names select the key that the signature is then checked against.
fn peek_payload(assertion: &str) -> Result<AssertionPayload, Rejection> {
    let mut segments = assertion.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Rejection::SignatureInvalid);
    };

    let bytes = Base64UrlUnpadded::decode_vec(payload).map_err(|_| Rejection::SignatureInvalid)?;
    serde_json::from_slice(&bytes).map_err(|_| Rejection::SignatureInvalid)
}

fn verify_signature(assertion: &str, pem: &str) -> Result<AssertionPayload, Rejection> {
    let key = DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|err| {
        debug!("unusable application key: {err}");
        Rejection::SignatureInvalid
    })?;

    // Assertions carry no registered claims; only the signature is checked.
    let mut validation = Validation::new(Algorithm::ES256);
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<AssertionPayload>(assertion, &key, &validation)
        .map(|data| data.claims)
        .map_err(|err| {
            debug!("assertion signature rejected: {err}");
            Rejection::SignatureInvalid
        })
}
