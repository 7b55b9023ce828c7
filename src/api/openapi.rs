use super::handlers::{handoff, health, login, register, types};
use crate::registration::{Confirmation, FieldErrors, FlowState, FlowView, StartView};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        handoff::create_token,
        login::welcome,
        login::login,
        login::phone_code,
        register::start_view,
        register::start,
        register::phone_code_view,
        register::phone_code,
        register::phone_resend_view,
        register::phone_resend,
        register::your_information_view,
        register::your_information,
        register::transition_emails_view,
        register::transition_emails,
        register::finish_view,
        register::finish,
        register::cancel,
    ),
    components(schemas(
        health::Health,
        types::HandoffRequest,
        types::HandoffResponse,
        types::ErrorResponse,
        types::WelcomeRequest,
        types::WelcomeResponse,
        types::FieldErrorResponse,
        types::RegisterStartRequest,
        types::PhoneCodeRequest,
        types::PhoneResendRequest,
        types::YourInformationRequest,
        types::TransitionEmailsRequest,
        types::LoginRequest,
        types::LoginResponse,
        FieldErrors,
        FlowState,
        FlowView,
        StartView,
        Confirmation,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Service health"),
        (name = "handoff", description = "Identity handoff from other services"),
        (name = "register", description = "Multi-step registration"),
        (name = "login", description = "Sign-in for existing accounts"),
    )
)]
pub struct ApiDoc;

/// Access tokens presented by handing-over applications on `POST /v1/jwt`.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/v1/jwt",
            "/v1/welcome",
            "/v1/login",
            "/v1/login/phone/code",
            "/v1/register/start",
            "/v1/register/phone/code",
            "/v1/register/phone/resend",
            "/v1/register/your-information",
            "/v1/register/transition-emails",
            "/v1/register/finish",
            "/v1/register/cancel",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let schemes = doc
            .components
            .map(|components| components.security_schemes)
            .unwrap_or_default();
        assert!(schemes.contains_key("bearer"));
    }
}
