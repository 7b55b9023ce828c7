//! Services the handoff and registration flows depend on but do not own.

pub mod accounts;
pub mod applications;
pub mod attribute_service;
pub mod audit;
pub mod mfa;

pub use accounts::{Account, AccountStore, CreateOutcome, NewAccount, PgAccountStore};
pub use applications::{Application, ApplicationKey, ApplicationRegistry, PgApplicationRegistry};
pub use attribute_service::{AttributeService, HttpAttributeService, LogAttributeService};
pub use audit::{AuditEvent, AuditEventKind, AuditSink, PgAuditSink};
pub use mfa::{CodeOutcome, LogSmsSender, MfaProvider, SmsCodeProvider, SmsSender};
