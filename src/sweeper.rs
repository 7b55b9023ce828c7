//! Background cleanup of abandoned flows and expired handoff tokens.
//!
//! Each pass first deletes registration flows nobody has touched within the
//! idle window and login flows older than it, then reclaims tokens past their
//! expiration age that no surviving flow references. Tokens released by this
//! pass's flow deletions are reclaimed on the same pass.

use crate::{
    handoff::Handoff,
    store::{FlowStore, LoginFlowStore},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug)]
pub struct SweeperConfig {
    interval: Duration,
    flow_idle: Duration,
}

impl SweeperConfig {
    /// Default: sweep every 5 minutes, flows idle for 30 minutes are dropped.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: Duration::from_secs(300),
            flow_idle: Duration::from_secs(1800),
        }
    }

    #[must_use]
    pub const fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub const fn with_flow_idle_seconds(mut self, seconds: u64) -> Self {
        self.flow_idle = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        };
        Self {
            interval,
            flow_idle: self.flow_idle,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub const fn flow_idle(&self) -> Duration {
        self.flow_idle
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What one pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_flows: u64,
    pub stale_logins: u64,
    pub tokens: u64,
}

pub struct Sweeper {
    config: SweeperConfig,
    handoff: Arc<Handoff>,
    flows: Arc<dyn FlowStore>,
    logins: Arc<dyn LoginFlowStore>,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        config: SweeperConfig,
        handoff: Arc<Handoff>,
        flows: Arc<dyn FlowStore>,
        logins: Arc<dyn LoginFlowStore>,
    ) -> Self {
        Self {
            config: config.normalize(),
            handoff,
            flows,
            logins,
        }
    }

    /// Run one cleanup pass as of `now`.
    ///
    /// # Errors
    /// Returns an error if any store operation fails; earlier deletions in the
    /// pass stay committed.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let idle = chrono::Duration::from_std(self.config.flow_idle)?;
        let cutoff = now - idle;

        let idle_flows = self.flows.delete_idle_flows(cutoff).await?;
        let stale_logins = self.logins.delete_stale_login_flows(cutoff).await?;
        let tokens = self.handoff.reclaim_expired(now).await?;

        let report = SweepReport {
            idle_flows,
            stale_logins,
            tokens,
        };
        if report == SweepReport::default() {
            debug!("sweep found nothing to remove");
        } else {
            info!(
                idle_flows,
                stale_logins,
                tokens,
                "sweep removed abandoned records"
            );
        }
        Ok(report)
    }
}

/// Run [`Sweeper::sweep_once`] forever on the configured interval.
pub fn spawn_sweeper(sweeper: Sweeper) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = sweeper.config.interval();

        loop {
            if let Err(err) = sweeper.sweep_once(Utc::now()).await {
                error!("sweep failed: {err:#}");
            }

            sleep(interval).await;
        }
    })
}
