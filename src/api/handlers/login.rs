use super::{
    cookies::{self, CookieSettings, LOGIN_COOKIE, TOKEN_COOKIE},
    extract_client_ip, internal_error, see_other,
    types::{
        FieldErrorResponse, LoginRequest, LoginResponse, PhoneCodeRequest, WelcomeRequest,
        WelcomeResponse,
    },
};
use crate::{
    login::{Login, LoginOutcome, WelcomeOutcome},
    registration::FieldErrors,
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

const LOGIN_PATH: &str = "/v1/login";
const LOGIN_PHONE_CODE_PATH: &str = "/v1/login/phone/code";

#[utoipa::path(
    post,
    path = "/v1/welcome",
    request_body = WelcomeRequest,
    responses(
        (status = 200, description = "Whether the email should log in or register", body = WelcomeResponse),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Malformed email", body = FieldErrorResponse),
    ),
    tag = "login"
)]
#[instrument(skip_all)]
pub async fn welcome(
    login: Extension<Arc<Login>>,
    payload: Option<Json<WelcomeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let next = match login.welcome(&request.email).await {
        Ok(WelcomeOutcome::Login) => "login",
        Ok(WelcomeOutcome::Register) => "register",
        Ok(WelcomeOutcome::Invalid(errors)) => return field_errors(errors),
        Err(err) => return internal_error("Failed to look up account", &err),
    };
    Json(WelcomeResponse {
        next: next.to_string(),
    })
    .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 303, description = "Phone code required"),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Incorrect credentials", body = FieldErrorResponse),
    ),
    tag = "login"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    login: Extension<Arc<Login>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let token_id = cookies::read_id(&headers, TOKEN_COOKIE);
    let password = SecretString::from(request.password);
    let outcome = login
        .login(token_id, &request.email, &password, extract_client_ip(&headers))
        .await;
    respond(outcome, *cookies)
}

#[utoipa::path(
    post,
    path = "/v1/login/phone/code",
    request_body = PhoneCodeRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 303, description = "No login waiting on a code"),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Code refused", body = FieldErrorResponse),
    ),
    tag = "login"
)]
#[instrument(skip_all)]
pub async fn phone_code(
    headers: HeaderMap,
    login: Extension<Arc<Login>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<PhoneCodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let login_flow_id = cookies::read_id(&headers, LOGIN_COOKIE);
    let outcome = login
        .verify_phone(login_flow_id, &request.phone_code, extract_client_ip(&headers))
        .await;
    respond(outcome, *cookies)
}

fn respond(outcome: anyhow::Result<LoginOutcome>, cookies: CookieSettings) -> Response {
    let mut response_headers = HeaderMap::new();
    match outcome {
        Ok(LoginOutcome::Complete { redirect, .. }) => {
            if let Ok(cookie) = cookies.clear(LOGIN_COOKIE) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (response_headers, Json(LoginResponse { redirect })).into_response()
        }
        Ok(LoginOutcome::PhoneCodeRequired { login_flow_id }) => {
            if let Ok(cookie) = cookies.session(LOGIN_COOKIE, login_flow_id) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            see_other(LOGIN_PHONE_CODE_PATH, response_headers)
        }
        Ok(LoginOutcome::Restart) => {
            if let Ok(cookie) = cookies.clear(LOGIN_COOKIE) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            see_other(LOGIN_PATH, response_headers)
        }
        Ok(LoginOutcome::Invalid(errors)) => field_errors(errors),
        Err(err) => internal_error("Login failed", &err),
    }
}

fn field_errors(errors: FieldErrors) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(FieldErrorResponse {
            state: None,
            errors,
            resend_path: None,
        }),
    )
        .into_response()
}
