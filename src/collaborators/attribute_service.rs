//! Delivery of handed-over attributes to the attribute service.

use crate::{APP_USER_AGENT, jwt::Attributes};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

#[async_trait]
pub trait AttributeService: Send + Sync {
    /// Store `attributes` on behalf of the access grant.
    async fn set_attributes(&self, access_grant_id: Uuid, attributes: &Attributes) -> Result<()>;
}

#[derive(Serialize)]
struct SetAttributesRequest<'a> {
    access_grant_id: Uuid,
    attributes: &'a Attributes,
}

pub struct HttpAttributeService {
    client: Client,
    base_url: String,
}

impl HttpAttributeService {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build attribute service client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AttributeService for HttpAttributeService {
    async fn set_attributes(&self, access_grant_id: Uuid, attributes: &Attributes) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/attributes", self.base_url))
            .json(&SetAttributesRequest {
                access_grant_id,
                attributes,
            })
            .send()
            .await
            .context("attribute service request failed")?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!(
                "attribute service responded with {}",
                response.status()
            ))
        }
    }
}

/// Attribute service used when no remote service is configured.
pub struct LogAttributeService;

#[async_trait]
impl AttributeService for LogAttributeService {
    async fn set_attributes(&self, access_grant_id: Uuid, attributes: &Attributes) -> Result<()> {
        let names: Vec<&str> = attributes.iter().map(|(name, _)| name.as_str()).collect();
        info!(%access_grant_id, ?names, "attributes recorded");
        Ok(())
    }
}

/// Send attributes in the background so account creation does not wait on
/// the remote service.
pub fn dispatch_attributes(
    service: Arc<dyn AttributeService>,
    access_grant_id: Uuid,
    attributes: Attributes,
) -> JoinHandle<()> {
    let span = info_span!("attributes.set", %access_grant_id);
    tokio::spawn(
        async move {
            if let Err(err) = service.set_attributes(access_grant_id, &attributes).await {
                error!("failed to set attributes: {err:#}");
            }
        }
        .instrument(span),
    )
}
