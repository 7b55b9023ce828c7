use super::Rejection;

/// Strip the trusted base from an absolute redirect, keeping the relative
/// suffix. The remainder must start a path, query or fragment so that a host
/// such as `https://accounts.example.com.evil.test` cannot pass as the base.
///
/// # Errors
/// Returns `InvalidOAuthRedirect` when `redirect` does not start with `base`.
pub fn relative_to_base(redirect: &str, base: &str) -> Result<String, Rejection> {
    let base = base.trim_end_matches('/');
    let suffix = redirect
        .strip_prefix(base)
        .ok_or(Rejection::InvalidOAuthRedirect)?;

    if suffix.is_empty() || suffix.starts_with(['/', '?', '#']) {
        Ok(suffix.to_string())
    } else {
        Err(Rejection::InvalidOAuthRedirect)
    }
}

/// Reattach the trusted base to a stored relative redirect.
#[must_use]
pub fn absolute_from_base(relative: &str, base: &str) -> String {
    format!("{}{relative}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://accounts.example.com";

    #[test]
    fn keeps_suffix_under_base() {
        assert_eq!(
            relative_to_base(
                "https://accounts.example.com/oauth/authorize?some-query-string",
                BASE
            ),
            Ok("/oauth/authorize?some-query-string".to_string())
        );
        assert_eq!(
            relative_to_base("https://accounts.example.com", BASE),
            Ok(String::new())
        );
    }

    #[test]
    fn rejects_foreign_hosts() {
        assert_eq!(
            relative_to_base("https://www.example.com", BASE),
            Err(Rejection::InvalidOAuthRedirect)
        );
        assert_eq!(
            relative_to_base("https://accounts.example.com.evil.test/oauth", BASE),
            Err(Rejection::InvalidOAuthRedirect)
        );
        assert_eq!(
            relative_to_base("/oauth/authorize", BASE),
            Err(Rejection::InvalidOAuthRedirect)
        );
    }

    #[test]
    fn reattaches_base() {
        assert_eq!(
            absolute_from_base("/oauth/authorize?x=1", "https://accounts.example.com/"),
            "https://accounts.example.com/oauth/authorize?x=1"
        );
    }
}
