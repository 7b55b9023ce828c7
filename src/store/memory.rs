//! In-process store used by unit tests. A single mutex guards all tables so
//! cross-table checks, such as token reclamation, see a consistent view.

use super::{
    FlowStore, FlowUpdate, LoginFlow, LoginFlowStore, NewLoginFlow, NewRegistrationFlow,
    RegistrationFlow, TokenRecord, TokenStore,
};
use crate::{jwt::ValidatedClaims, registration::FlowState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    tokens: HashMap<Uuid, TokenRecord>,
    flows: HashMap<Uuid, RegistrationFlow>,
    logins: HashMap<Uuid, LoginFlow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub async fn token_count(&self) -> usize {
        self.tables.lock().await.tokens.len()
    }

    pub async fn flow_count(&self) -> usize {
        self.tables.lock().await.flows.len()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_token(&self, claims: &ValidatedClaims) -> Result<TokenRecord> {
        let record = TokenRecord {
            id: Uuid::now_v7(),
            claims: claims.clone(),
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .tokens
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>> {
        Ok(self.tables.lock().await.tokens.get(&id).cloned())
    }

    async fn reclaim_tokens(&self, created_before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let Tables {
            tokens,
            flows,
            logins,
        } = &mut *tables;

        let before = tokens.len();
        tokens.retain(|id, token| {
            let referenced = flows.values().any(|flow| flow.token_id == Some(*id))
                || logins.values().any(|login| login.token_id == Some(*id));
            referenced || token.created_at >= created_before
        });
        Ok(u64::try_from(before - tokens.len()).unwrap_or(u64::MAX))
    }
}

/// Returns false, leaving the flow untouched, when a state change no longer
/// starts from the flow's state.
fn apply(flow: &mut RegistrationFlow, update: FlowUpdate) -> bool {
    match update {
        FlowUpdate::Advance { from, to } => {
            if flow.state != from {
                return false;
            }
            flow.state = to;
        }
        FlowUpdate::Phone(phone) => flow.phone = Some(phone),
        FlowUpdate::CookieConsent(value) => flow.cookie_consent = Some(value),
        FlowUpdate::FeedbackConsent(value) => flow.feedback_consent = Some(value),
        FlowUpdate::TransitionEmails { yes_to_emails } => {
            if flow.state != FlowState::TransitionEmails {
                return false;
            }
            flow.yes_to_emails = Some(yes_to_emails);
            flow.state = FlowState::Finish;
        }
    }
    flow.touched_at = Utc::now();
    true
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn replace_flow(&self, new: NewRegistrationFlow) -> Result<RegistrationFlow> {
        let mut tables = self.tables.lock().await;
        tables.flows.retain(|id, flow| {
            let same_token = new.token_id.is_some() && flow.token_id == new.token_id;
            !same_token && Some(*id) != new.supersedes
        });

        let now = Utc::now();
        let flow = RegistrationFlow {
            id: Uuid::now_v7(),
            state: new.state,
            email: new.email,
            password_hash: new.password_hash,
            phone: new.phone,
            cookie_consent: None,
            feedback_consent: None,
            yes_to_emails: None,
            previous_url: new.previous_url,
            token_id: new.token_id,
            touched_at: now,
            created_at: now,
        };
        tables.flows.insert(flow.id, flow.clone());
        Ok(flow)
    }

    async fn touch_flow(&self, id: Uuid) -> Result<Option<RegistrationFlow>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.flows.get_mut(&id).map(|flow| {
            flow.touched_at = Utc::now();
            flow.clone()
        }))
    }

    async fn find_flow(&self, id: Uuid) -> Result<Option<RegistrationFlow>> {
        Ok(self.tables.lock().await.flows.get(&id).cloned())
    }

    async fn update_flow(&self, id: Uuid, update: FlowUpdate) -> Result<Option<RegistrationFlow>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .flows
            .get_mut(&id)
            .and_then(|flow| apply(flow, update).then(|| flow.clone())))
    }

    async fn delete_flow(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.flows.remove(&id).is_some())
    }

    async fn delete_idle_flows(&self, touched_before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.flows.len();
        tables
            .flows
            .retain(|_, flow| flow.touched_at >= touched_before);
        Ok(u64::try_from(before - tables.flows.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl LoginFlowStore for MemoryStore {
    async fn insert_login_flow(&self, new: NewLoginFlow) -> Result<LoginFlow> {
        let flow = LoginFlow {
            id: Uuid::now_v7(),
            account_id: new.account_id,
            token_id: new.token_id,
            redirect_path: new.redirect_path,
            phone: new.phone,
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .logins
            .insert(flow.id, flow.clone());
        Ok(flow)
    }

    async fn find_login_flow(&self, id: Uuid) -> Result<Option<LoginFlow>> {
        Ok(self.tables.lock().await.logins.get(&id).cloned())
    }

    async fn delete_login_flow(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.logins.remove(&id).is_some())
    }

    async fn delete_stale_login_flows(&self, created_before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.logins.len();
        tables
            .logins
            .retain(|_, flow| flow.created_at >= created_before);
        Ok(u64::try_from(before - tables.logins.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::claims;
    use chrono::Duration;
    use secrecy::SecretString;

    fn new_flow(token_id: Option<Uuid>) -> NewRegistrationFlow {
        NewRegistrationFlow {
            state: FlowState::YourInformation,
            email: "visitor@example.com".to_string(),
            password_hash: SecretString::from("hash"),
            phone: None,
            previous_url: None,
            token_id,
            supersedes: None,
        }
    }

    #[tokio::test]
    async fn reclaim_skips_referenced_and_recent_tokens() -> Result<()> {
        let store = MemoryStore::default();
        let referenced = store.insert_token(&claims()).await?;
        let orphan = store.insert_token(&claims()).await?;
        store.replace_flow(new_flow(Some(referenced.id))).await?;

        // Nothing is old enough yet.
        assert_eq!(store.reclaim_tokens(Utc::now() - Duration::hours(1)).await?, 0);

        let removed = store.reclaim_tokens(Utc::now() + Duration::hours(1)).await?;
        assert_eq!(removed, 1);
        assert!(store.find_token(referenced.id).await?.is_some());
        assert!(store.find_token(orphan.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn reclaim_skips_tokens_held_by_login_flows() -> Result<()> {
        let store = MemoryStore::default();
        let token = store.insert_token(&claims()).await?;
        store
            .insert_login_flow(NewLoginFlow {
                account_id: Uuid::new_v4(),
                token_id: Some(token.id),
                redirect_path: "/".to_string(),
                phone: "+447700900000".to_string(),
            })
            .await?;

        assert_eq!(store.reclaim_tokens(Utc::now() + Duration::hours(1)).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn replace_evicts_flows_for_same_token() -> Result<()> {
        let store = MemoryStore::default();
        let token = store.insert_token(&claims()).await?;
        let first = store.replace_flow(new_flow(Some(token.id))).await?;
        let untokened = store.replace_flow(new_flow(None)).await?;
        let second = store.replace_flow(new_flow(Some(token.id))).await?;

        assert!(store.find_flow(first.id).await?.is_none());
        assert!(store.find_flow(second.id).await?.is_some());
        assert!(store.find_flow(untokened.id).await?.is_some());
        assert_eq!(store.flow_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn transition_emails_update_moves_to_finish() -> Result<()> {
        let store = MemoryStore::default();
        let flow = store.replace_flow(new_flow(None)).await?;
        let updated = store
            .update_flow(flow.id, FlowUpdate::TransitionEmails { yes_to_emails: true })
            .await?;

        // Still at your_information, so the decision is not recorded.
        assert!(updated.is_none());

        let advanced = store
            .update_flow(
                flow.id,
                FlowUpdate::Advance {
                    from: FlowState::YourInformation,
                    to: FlowState::TransitionEmails,
                },
            )
            .await?;
        assert!(advanced.is_some());

        let updated = store
            .update_flow(flow.id, FlowUpdate::TransitionEmails { yes_to_emails: true })
            .await?
            .ok_or_else(|| anyhow::anyhow!("flow vanished"))?;
        assert_eq!(updated.state, FlowState::Finish);
        assert_eq!(updated.yes_to_emails, Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn stale_advance_leaves_state_alone() -> Result<()> {
        let store = MemoryStore::default();
        let flow = store.replace_flow(new_flow(None)).await?;
        let to_finish = FlowUpdate::Advance {
            from: FlowState::YourInformation,
            to: FlowState::Finish,
        };
        assert!(store.update_flow(flow.id, to_finish.clone()).await?.is_some());

        let back = FlowUpdate::Advance {
            from: FlowState::YourInformation,
            to: FlowState::TransitionEmails,
        };
        assert!(store.update_flow(flow.id, back).await?.is_none());
        let state = store.find_flow(flow.id).await?.map(|flow| flow.state);
        assert_eq!(state, Some(FlowState::Finish));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_replace_keeps_one_flow_per_token() -> Result<()> {
        let store = MemoryStore::default();
        let token = store.insert_token(&claims()).await?;
        let (first, second) = tokio::join!(
            store.replace_flow(new_flow(Some(token.id))),
            store.replace_flow(new_flow(Some(token.id))),
        );
        first?;
        second?;

        assert_eq!(store.flow_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn idle_flows_are_swept() -> Result<()> {
        let store = MemoryStore::default();
        store.replace_flow(new_flow(None)).await?;

        assert_eq!(store.delete_idle_flows(Utc::now() - Duration::minutes(5)).await?, 0);
        assert_eq!(store.delete_idle_flows(Utc::now() + Duration::minutes(5)).await?, 1);
        assert_eq!(store.flow_count().await, 0);
        Ok(())
    }
}
