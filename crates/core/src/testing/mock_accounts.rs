//! Mock account pool for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::automation::{AccountPool, AccountPoolError, AutomationAccount};

/// Mock implementation of the AccountPool trait.
///
/// Hands out accounts round-robin and counts recorded usage. Can be switched
/// to report no available account.
#[derive(Debug)]
pub struct MockAccountPool {
    accounts: Vec<AutomationAccount>,
    next: Arc<RwLock<usize>>,
    usage: Arc<RwLock<Vec<String>>>,
    exhausted: Arc<RwLock<bool>>,
}

impl Default for MockAccountPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAccountPool {
    /// Create a pool with no accounts.
    pub fn new() -> Self {
        Self::with_accounts(0)
    }

    /// Create a pool with `count` accounts named `mock-account-N`.
    pub fn with_accounts(count: usize) -> Self {
        let accounts = (1..=count)
            .map(|i| {
                AutomationAccount::new(
                    format!("mock-account-{}", i),
                    format!("mock-{}@example.com", i),
                )
            })
            .collect();
        Self {
            accounts,
            next: Arc::new(RwLock::new(0)),
            usage: Arc::new(RwLock::new(Vec::new())),
            exhausted: Arc::new(RwLock::new(false)),
        }
    }

    /// Total recorded usages across accounts.
    pub async fn usage_count(&self) -> usize {
        self.usage.read().await.len()
    }

    /// Ids of accounts in the order their usage was recorded.
    pub async fn usage(&self) -> Vec<String> {
        self.usage.read().await.clone()
    }

    /// When true, no account is ever available.
    pub async fn set_exhausted(&self, exhausted: bool) {
        *self.exhausted.write().await = exhausted;
    }
}

#[async_trait]
impl AccountPool for MockAccountPool {
    async fn select_available_account(
        &self,
    ) -> Result<Option<AutomationAccount>, AccountPoolError> {
        if *self.exhausted.read().await || self.accounts.is_empty() {
            return Ok(None);
        }
        let mut next = self.next.write().await;
        let account = self.accounts[*next % self.accounts.len()].clone();
        *next += 1;
        Ok(Some(account))
    }

    async fn record_usage(&self, account: &AutomationAccount) -> Result<(), AccountPoolError> {
        self.usage.write().await.push(account.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_robin_and_exhaustion() {
        let pool = MockAccountPool::with_accounts(2);

        let first = pool.select_available_account().await.unwrap().unwrap();
        let second = pool.select_available_account().await.unwrap().unwrap();
        let third = pool.select_available_account().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.id, third.id);

        pool.set_exhausted(true).await;
        assert!(pool.select_available_account().await.unwrap().is_none());

        pool.record_usage(&first).await.unwrap();
        assert_eq!(pool.usage_count().await, 1);
    }
}
