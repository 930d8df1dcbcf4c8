//! Built-in collaborators for running the worker without external clients.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    AccountPool, AccountPoolError, AutomationAccount, AutomationError, BrowserAutomation,
    MetadataError, TrafficRouter, TrafficRoutingError, TrafficRoutingResult, VideoDetails,
    VideoMetadataProvider,
};
use crate::config::AccountConfig;
use crate::order::Order;

/// Metadata provider that only knows what the link itself says.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlMetadataProvider;

#[async_trait]
impl VideoMetadataProvider for UrlMetadataProvider {
    async fn view_count(&self, _video_id: &str) -> Result<Option<u64>, MetadataError> {
        Ok(None)
    }

    async fn video_details(
        &self,
        _video_id: &str,
    ) -> Result<Option<VideoDetails>, MetadataError> {
        Ok(None)
    }
}

/// Automation backend used when none is configured. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAutomation;

#[async_trait]
impl BrowserAutomation for DisabledAutomation {
    async fn create_clip(
        &self,
        _video_url: &str,
        _account: &AutomationAccount,
        _title: Option<&str>,
    ) -> Result<Option<String>, AutomationError> {
        Err(AutomationError::Unavailable(
            "browser automation is not configured".to_string(),
        ))
    }

    async fn test_connection(&self) -> bool {
        false
    }
}

/// Traffic router used when none is configured.
///
/// Always reports failure so every order lands in `InProgress` with a
/// routing warning for an operator to act on.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredTrafficRouter;

#[async_trait]
impl TrafficRouter for UnconfiguredTrafficRouter {
    async fn create_integration(
        &self,
        order: &Order,
        _video_id: Option<&str>,
        _clip_created: bool,
        _target_url: &str,
    ) -> Result<TrafficRoutingResult, TrafficRoutingError> {
        warn!(
            "No traffic router configured, order {} needs manual routing",
            order.id
        );
        Ok(TrafficRoutingResult::failed("no traffic router configured"))
    }
}

struct AccountUsage {
    day: NaiveDate,
    clips: u32,
}

/// Account pool backed by `[[automation.accounts]]`.
///
/// Picks the least-used account that is still under its daily limit. Usage
/// is kept in memory and resets at UTC midnight.
pub struct ConfiguredAccountPool {
    accounts: Vec<AccountConfig>,
    usage: Mutex<HashMap<String, AccountUsage>>,
}

impl ConfiguredAccountPool {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self {
            accounts,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Clips recorded today for `account_id`.
    pub async fn usage_today(&self, account_id: &str) -> u32 {
        let today = Utc::now().date_naive();
        let usage = self.usage.lock().await;
        usage
            .get(account_id)
            .filter(|u| u.day == today)
            .map_or(0, |u| u.clips)
    }
}

#[async_trait]
impl AccountPool for ConfiguredAccountPool {
    async fn select_available_account(
        &self,
    ) -> Result<Option<AutomationAccount>, AccountPoolError> {
        let today = Utc::now().date_naive();
        let usage = self.usage.lock().await;

        let selected = self
            .accounts
            .iter()
            .map(|account| {
                let used = usage
                    .get(&account.id)
                    .filter(|u| u.day == today)
                    .map_or(0, |u| u.clips);
                (account, used)
            })
            .filter(|(account, used)| account.daily_limit == 0 || *used < account.daily_limit)
            .min_by_key(|(_, used)| *used)
            .map(|(account, _)| AutomationAccount::new(&account.id, &account.email));

        if selected.is_none() {
            debug!("No automation account under its daily limit");
        }

        Ok(selected)
    }

    async fn record_usage(&self, account: &AutomationAccount) -> Result<(), AccountPoolError> {
        let today = Utc::now().date_naive();
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(account.id.clone()).or_insert(AccountUsage {
            day: today,
            clips: 0,
        });
        if entry.day != today {
            entry.day = today;
            entry.clips = 0;
        }
        entry.clips += 1;
        Ok(())
    }
}
