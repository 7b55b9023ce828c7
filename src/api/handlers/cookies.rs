//! Cookies binding a browser to its handoff token and registration flow.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};
use uuid::Uuid;

pub const TOKEN_COOKIE: &str = "accounts_jwt";
pub const FLOW_COOKIE: &str = "accounts_registration";
pub const LOGIN_COOKIE: &str = "accounts_login";
pub const PREFERENCES_SET_COOKIE: &str = "cookies_preferences_set";
pub const POLICY_COOKIE: &str = "cookies_policy";

const SESSION_TTL_SECONDS: u64 = 60 * 60 * 24;
const PREFERENCES_TTL_SECONDS: u64 = 60 * 60 * 24 * 365;

#[derive(Clone, Copy, Debug)]
pub struct CookieSettings {
    secure: bool,
}

impl CookieSettings {
    /// Cookies are only marked `Secure` when the site is served over HTTPS.
    #[must_use]
    pub fn for_base_url(trusted_base_url: &str) -> Self {
        Self {
            secure: trusted_base_url.starts_with("https://"),
        }
    }

    /// `HttpOnly` cookie carrying an id.
    pub fn session(self, name: &str, id: Uuid) -> Result<HeaderValue, InvalidHeaderValue> {
        self.finish(format!(
            "{name}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_TTL_SECONDS}"
        ))
    }

    pub fn clear(self, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.finish(format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"))
    }

    /// Consent cookies are read by the frontend, so they are not `HttpOnly`.
    pub fn preference(self, name: &str, value: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let value: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        self.finish(format!(
            "{name}={value}; Path=/; SameSite=Lax; Max-Age={PREFERENCES_TTL_SECONDS}"
        ))
    }

    fn finish(self, mut cookie: String) -> Result<HeaderValue, InvalidHeaderValue> {
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

/// An id cookie; malformed values count as absent.
pub fn read_id(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    read(headers, name).and_then(|value| Uuid::parse_str(&value).ok())
}
