//! Request and response bodies of the HTTP API.

use crate::registration::{FieldErrors, FlowState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug)]
pub struct HandoffRequest {
    /// ES256 assertion from the handing-over application.
    pub jwt: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct HandoffResponse {
    pub token_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct WelcomeRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct WelcomeResponse {
    /// `login` or `register`.
    pub next: String,
}

/// Field errors for a step, with the step to show them on.
#[derive(ToSchema, Serialize, Debug)]
pub struct FieldErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<FlowState>,
    pub errors: FieldErrors,
    /// Where to ask for a new code after a failed phone code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resend_path: Option<String>,
}

// Bodies carrying passwords do not derive Debug.
#[derive(ToSchema, Deserialize)]
pub struct RegisterStartRequest {
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub previous_url: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct PhoneCodeRequest {
    pub phone_code: String,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct PhoneResendRequest {
    /// A corrected number; the stored one is used when absent.
    pub phone: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct YourInformationRequest {
    /// `yes` or `no`.
    pub cookie_consent: Option<String>,
    /// `yes` or `no`.
    pub feedback_consent: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct TransitionEmailsRequest {
    /// `yes` or `no`.
    pub email_decision: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub redirect: String,
}
