//! # Accounts
//!
//! `accounts` is where a user lands when another service sends them to sign
//! up or sign in. The calling service hands over a signed ES256 assertion
//! describing what it needs; `accounts` validates it, keeps it server-side as
//! a **handoff token** and then walks the user through registration or login.
//!
//! ## Handoff
//!
//! The assertion names its issuer application (`uid`) and signing key
//! (`kid`). Both must be registered, the signature must verify with that key
//! and every requested attribute must be covered by the application's
//! scopes. Redirect targets (`post_login_oauth`, `post_register_oauth`) must
//! stay under the configured trusted base URL. The accepted claims are stored
//! and only an opaque token id travels back to the browser.
//!
//! ## Registration
//!
//! Registration is a server-side state machine keyed by a flow id:
//!
//! 1. `start`: email, password and consents.
//! 2. `phone`: SMS code verification, when multi-factor is enabled.
//! 3. `your_information`: the requested attributes.
//! 4. `transition_emails`: topic subscription, when the caller asked for one.
//! 5. `finish`: account creation and deferred attribute writes.
//!
//! Every step checks the flow's current state first; a request for the
//! wrong step is redirected to the step the flow is actually on.
//!
//! ## Maintenance
//!
//! A background sweeper drops idle flows and reclaims handoff tokens that
//! are past their expiration age and no longer referenced by any flow.

pub mod api;
pub mod cli;
pub mod collaborators;
pub mod handoff;
pub mod jwt;
pub mod login;
pub mod registration;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod testing;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
