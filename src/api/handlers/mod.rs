pub mod cookies;
pub mod handoff;
pub mod health;
pub mod login;
pub mod register;
pub mod types;

use axum::{
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, LOCATION},
    },
    response::{IntoResponse, Response},
};
use tracing::error;

/// Log an infrastructure failure and answer 500 without details.
pub(crate) fn internal_error(context: &str, err: &anyhow::Error) -> Response {
    error!("{context}: {err:#}");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// `303 See Other` to `path`, carrying any cookies already set.
pub(crate) fn see_other(path: &str, mut headers: HeaderMap) -> Response {
    match HeaderValue::from_str(path) {
        Ok(location) => {
            headers.insert(LOCATION, location);
            (StatusCode::SEE_OTHER, headers).into_response()
        }
        Err(err) => {
            error!("Invalid redirect location {path}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
