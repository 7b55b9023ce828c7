//! Registration steps over HTTP.
//!
//! Every step that moves the visitor answers `303 See Other` to the path of
//! the step the flow is now at; the flow itself is bound to the browser with
//! the `accounts_registration` cookie.

use super::{
    cookies::{
        self, CookieSettings, FLOW_COOKIE, POLICY_COOKIE, PREFERENCES_SET_COOKIE, TOKEN_COOKIE,
    },
    extract_client_ip, internal_error, see_other,
    types::{
        FieldErrorResponse, PhoneCodeRequest, PhoneResendRequest, RegisterStartRequest,
        TransitionEmailsRequest, YourInformationRequest,
    },
};
use crate::registration::{
    Confirmation, FlowState, FlowView, Registration, StartOutcome, StartRequest, StartView,
    StepOutcome,
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::instrument;

pub const RESEND_PATH: &str = "/v1/register/phone/resend";

fn missing_payload() -> Response {
    (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response()
}

fn respond(outcome: anyhow::Result<StepOutcome>, cookies: CookieSettings) -> Response {
    let mut response_headers = HeaderMap::new();
    match outcome {
        Ok(StepOutcome::Restart) => {
            if let Ok(cookie) = cookies.clear(FLOW_COOKIE) {
                response_headers.append(SET_COOKIE, cookie);
            }
            see_other(FlowState::Start.path(), response_headers)
        }
        Ok(StepOutcome::Redirect(state)) => see_other(state.path(), response_headers),
        Ok(StepOutcome::Advance { next, preferences }) => {
            if let Some(preferences) = preferences {
                if let Ok(cookie) = cookies.preference(PREFERENCES_SET_COOKIE, "true") {
                    response_headers.append(SET_COOKIE, cookie);
                }
                if let Ok(cookie) = cookies.preference(POLICY_COOKIE, &preferences.policy_json())
                {
                    response_headers.append(SET_COOKIE, cookie);
                }
            }
            see_other(next.path(), response_headers)
        }
        Ok(StepOutcome::Redisplay { state, errors }) => {
            let resend_path =
                (state == FlowState::Phone && !errors.get("phone_code").is_empty())
                    .then(|| RESEND_PATH.to_string());
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FieldErrorResponse {
                    state: Some(state),
                    errors,
                    resend_path,
                }),
            )
                .into_response()
        }
        Ok(StepOutcome::Show(view)) => Json(view).into_response(),
        Ok(StepOutcome::Created(confirmation)) => {
            if let Ok(cookie) = cookies.clear(FLOW_COOKIE) {
                response_headers.append(SET_COOKIE, cookie);
            }
            (StatusCode::CREATED, response_headers, Json(confirmation)).into_response()
        }
        Err(err) => internal_error("Registration step failed", &err),
    }
}

async fn show(
    headers: &HeaderMap,
    registration: &Registration,
    cookies: CookieSettings,
    step: FlowState,
) -> Response {
    let flow_id = cookies::read_id(headers, FLOW_COOKIE);
    respond(registration.view(flow_id, step).await, cookies)
}

#[utoipa::path(
    get,
    path = "/v1/register/start",
    responses(
        (status = 200, description = "Whether registration is open and what the handoff asks for", body = StartView),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn start_view(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
) -> Response {
    let token_id = cookies::read_id(&headers, TOKEN_COOKIE);
    match registration.start_view(token_id).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => internal_error("Failed to load handoff token", &err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/register/start",
    request_body = RegisterStartRequest,
    responses(
        (status = 303, description = "Flow started; Location is the next step"),
        (status = 400, description = "Missing payload"),
        (status = 403, description = "Registration is closed"),
        (status = 422, description = "Invalid details", body = FieldErrorResponse),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn start(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<RegisterStartRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let token_id = cookies::read_id(&headers, TOKEN_COOKIE);
    let current_flow = cookies::read_id(&headers, FLOW_COOKIE);
    let request = StartRequest {
        email: request.email,
        password: SecretString::from(request.password),
        phone: request.phone,
        previous_url: request.previous_url,
    };

    match registration.start(token_id, current_flow, request).await {
        Ok(StartOutcome::Closed) => StatusCode::FORBIDDEN.into_response(),
        Ok(StartOutcome::Invalid(errors)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(FieldErrorResponse {
                state: Some(FlowState::Start),
                errors,
                resend_path: None,
            }),
        )
            .into_response(),
        Ok(StartOutcome::Started { flow_id, next }) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = cookies.session(FLOW_COOKIE, flow_id) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            see_other(next.path(), response_headers)
        }
        Err(err) => internal_error("Failed to start registration", &err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/register/phone/code",
    responses(
        (status = 200, description = "Flow is waiting on the phone code", body = FlowView),
        (status = 303, description = "Flow is elsewhere or missing"),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn phone_code_view(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    show(&headers, &registration, *cookies, FlowState::Phone).await
}

#[utoipa::path(
    post,
    path = "/v1/register/phone/code",
    request_body = PhoneCodeRequest,
    responses(
        (status = 303, description = "Code accepted, or flow is elsewhere"),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Code refused", body = FieldErrorResponse),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn phone_code(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<PhoneCodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let flow_id = cookies::read_id(&headers, FLOW_COOKIE);
    respond(
        registration.phone_code(flow_id, &request.phone_code).await,
        *cookies,
    )
}

#[utoipa::path(
    get,
    path = "/v1/register/phone/resend",
    responses(
        (status = 200, description = "The number the code goes to, in E.164", body = FlowView),
        (status = 303, description = "Flow is elsewhere or missing"),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn phone_resend_view(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    show(&headers, &registration, *cookies, FlowState::Phone).await
}

#[utoipa::path(
    post,
    path = "/v1/register/phone/resend",
    request_body(content = PhoneResendRequest, description = "Optional corrected number"),
    responses(
        (status = 303, description = "New code sent"),
        (status = 422, description = "Invalid phone number", body = FieldErrorResponse),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn phone_resend(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<PhoneResendRequest>>,
) -> Response {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let flow_id = cookies::read_id(&headers, FLOW_COOKIE);
    respond(
        registration
            .phone_resend(flow_id, request.phone.as_deref())
            .await,
        *cookies,
    )
}

#[utoipa::path(
    get,
    path = "/v1/register/your-information",
    responses(
        (status = 200, description = "Consent answers recorded so far", body = FlowView),
        (status = 303, description = "Flow is elsewhere or missing"),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn your_information_view(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    show(&headers, &registration, *cookies, FlowState::YourInformation).await
}

#[utoipa::path(
    post,
    path = "/v1/register/your-information",
    request_body = YourInformationRequest,
    responses(
        (status = 303, description = "Consent recorded; cookie preferences set"),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "An answer is missing", body = FieldErrorResponse),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn your_information(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<YourInformationRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let flow_id = cookies::read_id(&headers, FLOW_COOKIE);
    respond(
        registration
            .your_information(
                flow_id,
                request.cookie_consent.as_deref(),
                request.feedback_consent.as_deref(),
            )
            .await,
        *cookies,
    )
}

#[utoipa::path(
    get,
    path = "/v1/register/transition-emails",
    responses(
        (status = 200, description = "The topic the visitor may subscribe to", body = FlowView),
        (status = 303, description = "Flow is elsewhere or missing"),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn transition_emails_view(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    show(&headers, &registration, *cookies, FlowState::TransitionEmails).await
}

#[utoipa::path(
    post,
    path = "/v1/register/transition-emails",
    request_body = TransitionEmailsRequest,
    responses(
        (status = 303, description = "Decision recorded"),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "No decision given", body = FieldErrorResponse),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn transition_emails(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<TransitionEmailsRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let flow_id = cookies::read_id(&headers, FLOW_COOKIE);
    respond(
        registration
            .transition_emails(flow_id, request.email_decision.as_deref())
            .await,
        *cookies,
    )
}

#[utoipa::path(
    get,
    path = "/v1/register/finish",
    responses(
        (status = 200, description = "Summary before the account is created", body = FlowView),
        (status = 303, description = "Flow is elsewhere or missing"),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn finish_view(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    show(&headers, &registration, *cookies, FlowState::Finish).await
}

#[utoipa::path(
    post,
    path = "/v1/register/finish",
    responses(
        (status = 201, description = "Account created", body = Confirmation),
        (status = 303, description = "Flow is elsewhere or missing"),
        (status = 422, description = "Account could not be created", body = FieldErrorResponse),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn finish(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    let flow_id = cookies::read_id(&headers, FLOW_COOKIE);
    respond(
        registration
            .finish(flow_id, extract_client_ip(&headers))
            .await,
        *cookies,
    )
}

#[utoipa::path(
    post,
    path = "/v1/register/cancel",
    responses(
        (status = 204, description = "Flow abandoned"),
    ),
    tag = "register"
)]
#[instrument(skip_all)]
pub async fn cancel(
    headers: HeaderMap,
    registration: Extension<Arc<Registration>>,
    cookies: Extension<CookieSettings>,
) -> Response {
    let flow_id = cookies::read_id(&headers, FLOW_COOKIE);
    if let Err(err) = registration.cancel(flow_id).await {
        return internal_error("Failed to cancel registration", &err);
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = cookies.clear(FLOW_COOKIE) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}
