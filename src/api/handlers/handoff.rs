use super::{
    cookies::{CookieSettings, TOKEN_COOKIE},
    extract_bearer_token, internal_error,
    types::{ErrorResponse, HandoffRequest, HandoffResponse},
};
use crate::{handoff::Handoff, jwt::HandoffError};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{info, instrument};

#[utoipa::path(
    post,
    path = "/v1/jwt",
    request_body = HandoffRequest,
    responses(
        (status = 201, description = "Assertion accepted, handoff token created", body = HandoffResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Unknown bearer access token"),
        (status = 422, description = "Assertion rejected", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "handoff"
)]
#[instrument(skip_all)]
pub async fn create_token(
    headers: HeaderMap,
    handoff: Extension<Arc<Handoff>>,
    cookies: Extension<CookieSettings>,
    payload: Option<Json<HandoffRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let trusted_application = match extract_bearer_token(&headers) {
        Some(access_token) => match handoff.trusted_application(&access_token).await {
            Ok(Some(application_id)) => Some(application_id),
            Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
            Err(err) => return internal_error("Failed to resolve access token", &err),
        },
        None => None,
    };

    match handoff.create_token(&request.jwt, trusted_application).await {
        Ok(record) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = cookies.session(TOKEN_COOKIE, record.id) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (
                StatusCode::CREATED,
                response_headers,
                Json(HandoffResponse {
                    token_id: record.id,
                }),
            )
                .into_response()
        }
        Err(HandoffError::Rejected(rejection)) => {
            info!(reason = rejection.code(), "assertion rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: rejection.code().to_string(),
                }),
            )
                .into_response()
        }
        Err(HandoffError::Storage(err)) => internal_error("Failed to create handoff token", &err),
    }
}
