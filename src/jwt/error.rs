use thiserror::Error;

/// Reasons an inbound assertion is refused. Each variant maps to a stable
/// string code returned to the calling service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("assertion has no uid")]
    MissingFieldUid,
    #[error("assertion has no key")]
    MissingFieldKey,
    #[error("no application matches the assertion uid")]
    UidNotFound,
    #[error("no signing key matches the assertion key")]
    KeyNotFound,
    #[error("assertion signature could not be verified")]
    SignatureInvalid,
    #[error("assertion has no post_login_oauth")]
    MissingFieldPostLoginOAuth,
    #[error("assertion requests scopes the application was not granted")]
    InvalidScopes,
    #[error("assertion carries attributes its scopes do not cover")]
    InsufficientScopes,
    #[error("assertion redirect is outside the trusted base URL")]
    InvalidOAuthRedirect,
}

impl Rejection {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingFieldUid => "missing_field_uid",
            Self::MissingFieldKey => "missing_field_key",
            Self::UidNotFound => "uid_not_found",
            Self::KeyNotFound => "key_not_found",
            Self::SignatureInvalid => "signature_invalid",
            Self::MissingFieldPostLoginOAuth => "missing_field_post_login_oauth",
            Self::InvalidScopes => "invalid_scopes",
            Self::InsufficientScopes => "insufficient_scopes",
            Self::InvalidOAuthRedirect => "invalid_oauth_redirect",
        }
    }
}

/// Failure of the handoff pipeline: either the assertion itself was refused,
/// or a backing store could not answer.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl HandoffError {
    #[must_use]
    pub const fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected(rejection) => Some(*rejection),
            Self::Storage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_snake_case() {
        assert_eq!(Rejection::MissingFieldUid.code(), "missing_field_uid");
        assert_eq!(
            Rejection::MissingFieldPostLoginOAuth.code(),
            "missing_field_post_login_oauth"
        );
        assert_eq!(
            Rejection::InvalidOAuthRedirect.code(),
            "invalid_oauth_redirect"
        );
    }

    #[test]
    fn storage_errors_carry_no_rejection() {
        let err = HandoffError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.rejection(), None);
        assert!(err.to_string().contains("connection reset"));

        let err = HandoffError::from(Rejection::KeyNotFound);
        assert_eq!(err.rejection(), Some(Rejection::KeyNotFound));
    }
}
