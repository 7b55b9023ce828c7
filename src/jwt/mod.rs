//! Inbound identity assertions from relying services.
//!
//! An assertion is an ES256-signed JWT whose payload names the issuing
//! application (`uid`) and the key it signed with (`key`), and carries the
//! scopes, attributes and post-login redirects the caller wants honoured.

mod attributes;
mod error;
pub mod redirect;
mod verify;

pub use attributes::{AttributeName, Attributes, TransitionCheckerState};
pub use error::{HandoffError, Rejection};
pub use verify::{SigningKey, ValidatedClaims, Verifier};
