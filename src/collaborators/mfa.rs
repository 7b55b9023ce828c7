//! SMS one-time codes and phone number handling.
//!
//! Codes live in process memory, keyed by the flow they were issued for, and
//! are stored as SHA-256 digests. Each code expires after a TTL and locks out
//! after a bounded number of wrong guesses until a new code is sent.

use anyhow::Result;
use async_trait::async_trait;
use rand::{Rng, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};
use uuid::Uuid;

const CODE_DIGITS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOutcome {
    Ok,
    Invalid,
    Expired,
    TooManyAttempts,
}

impl CodeOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
            Self::TooManyAttempts => "too_many_attempts",
        }
    }
}

#[async_trait]
pub trait MfaProvider: Send + Sync {
    /// Issue a fresh code for `subject`, replacing any earlier one, and send
    /// it to `phone`.
    async fn generate_and_send_code(&self, subject: Uuid, phone: &str) -> Result<()>;
    async fn verify_code(&self, subject: Uuid, code: &str) -> Result<CodeOutcome>;
}

/// Outbound SMS delivery.
pub trait SmsSender: Send + Sync {
    /// Send an SMS message.
    /// # Errors
    /// Returns an error if the message cannot be delivered.
    fn send(&self, destination: &str, body: &str) -> Result<()>;
}

/// Default SMS sender that logs instead of delivering.
pub struct LogSmsSender;

impl SmsSender for LogSmsSender {
    fn send(&self, destination: &str, body: &str) -> Result<()> {
        info!(destination, body, "SMS queued");
        Ok(())
    }
}

/// Normalize a phone number to E.164. National numbers with a leading `0`
/// are taken as UK numbers.
#[must_use]
pub fn e164_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (international, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }

    let normalized = if international {
        format!("+{digits}")
    } else if let Some(rest) = digits.strip_prefix("00") {
        format!("+{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("+44{rest}")
    } else {
        return None;
    };

    valid_phone(&normalized).then_some(normalized)
}

#[must_use]
pub fn valid_phone(e164: &str) -> bool {
    Regex::new(r"^\+[1-9][0-9]{7,14}$").is_ok_and(|regex| regex.is_match(e164))
}

/// UK mobiles are addressed in national format; everything else in E.164.
#[must_use]
pub fn sms_destination(e164: &str) -> String {
    if let Some(rest) = e164.strip_prefix("+447")
        && rest.len() == 9
    {
        format!("07{rest}")
    } else {
        e164.to_string()
    }
}

fn hash_code(code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

fn generate_code() -> String {
    let upper = 10_u32.pow(u32::try_from(CODE_DIGITS).unwrap_or(5));
    let value = OsRng.gen_range(0..upper);
    format!("{value:0width$}", width = CODE_DIGITS)
}

struct PendingCode {
    digest: Vec<u8>,
    expires_at: Instant,
    attempts: u32,
}

pub struct SmsCodeProvider {
    sender: Arc<dyn SmsSender>,
    ttl: Duration,
    max_attempts: u32,
    codes: Mutex<HashMap<Uuid, PendingCode>>,
}

impl SmsCodeProvider {
    #[must_use]
    pub fn new(sender: Arc<dyn SmsSender>, ttl: Duration, max_attempts: u32) -> Self {
        Self {
            sender,
            ttl,
            max_attempts: max_attempts.max(1),
            codes: Mutex::new(HashMap::new()),
        }
    }

    async fn issue(&self, subject: Uuid) -> String {
        let code = generate_code();
        let now = Instant::now();
        let mut codes = self.codes.lock().await;
        codes.retain(|_, pending| pending.expires_at > now);
        codes.insert(
            subject,
            PendingCode {
                digest: hash_code(&code),
                expires_at: now + self.ttl,
                attempts: 0,
            },
        );
        code
    }
}

#[async_trait]
impl MfaProvider for SmsCodeProvider {
    async fn generate_and_send_code(&self, subject: Uuid, phone: &str) -> Result<()> {
        let code = self.issue(subject).await;
        let body = format!("{code} is your security code");
        self.sender.send(&sms_destination(phone), &body)
    }

    async fn verify_code(&self, subject: Uuid, code: &str) -> Result<CodeOutcome> {
        let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        let mut codes = self.codes.lock().await;

        let Some(pending) = codes.get_mut(&subject) else {
            return Ok(CodeOutcome::Expired);
        };

        if Instant::now() >= pending.expires_at {
            codes.remove(&subject);
            return Ok(CodeOutcome::Expired);
        }

        if pending.attempts >= self.max_attempts {
            return Ok(CodeOutcome::TooManyAttempts);
        }

        if pending.digest == hash_code(&code) {
            codes.remove(&subject);
            return Ok(CodeOutcome::Ok);
        }

        pending.attempts += 1;
        debug!(%subject, attempts = pending.attempts, "phone code mismatch");
        if pending.attempts >= self.max_attempts {
            Ok(CodeOutcome::TooManyAttempts)
        } else {
            Ok(CodeOutcome::Invalid)
        }
    }
}
