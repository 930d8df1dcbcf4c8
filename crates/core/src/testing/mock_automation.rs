//! Mock browser automation for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::automation::{AutomationAccount, AutomationError, BrowserAutomation};

/// A recorded `create_clip` call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedClipCall {
    pub video_url: String,
    pub account_id: String,
    pub title: Option<String>,
}

/// Mock implementation of the BrowserAutomation trait.
///
/// Provides controllable behavior for testing:
/// - Queue per-call outcomes, then fall back to a sticky failure or success
/// - Simulate slow sessions
/// - Track calls and peak concurrency
///
/// # Example
///
/// ```rust,ignore
/// use viewrelay_core::testing::MockBrowserAutomation;
///
/// let automation = MockBrowserAutomation::new();
///
/// // First call finds no clip button, the next ones succeed
/// automation.push_outcome(Ok(None)).await;
///
/// let url = automation.create_clip(video_url, &account, None).await?;
/// assert_eq!(automation.call_count().await, 1);
/// ```
#[derive(Debug)]
pub struct MockBrowserAutomation {
    calls: Arc<RwLock<Vec<RecordedClipCall>>>,
    /// Outcomes consumed one per call, before anything else applies.
    outcomes: Arc<RwLock<VecDeque<Result<Option<String>, AutomationError>>>>,
    /// Returned for every call once `outcomes` is empty.
    sticky_error: Arc<RwLock<Option<AutomationError>>>,
    delay: Arc<RwLock<Duration>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    connected: Arc<RwLock<bool>>,
}

impl Default for MockBrowserAutomation {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowserAutomation {
    /// Create a mock that succeeds instantly with a fresh clip URL per call.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            outcomes: Arc::new(RwLock::new(VecDeque::new())),
            sticky_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            connected: Arc::new(RwLock::new(true)),
        }
    }

    /// Get all recorded calls.
    pub async fn calls(&self) -> Vec<RecordedClipCall> {
        self.calls.read().await.clone()
    }

    /// Get the number of `create_clip` calls so far.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Queue the outcome of the next call.
    pub async fn push_outcome(&self, outcome: Result<Option<String>, AutomationError>) {
        self.outcomes.write().await.push_back(outcome);
    }

    /// Fail every call (after queued outcomes) with `error`.
    pub async fn fail_always(&self, error: AutomationError) {
        *self.sticky_error.write().await = Some(error);
    }

    /// Make every call take `delay` before returning.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Control what `test_connection` reports.
    pub async fn set_connected(&self, connected: bool) {
        *self.connected.write().await = connected;
    }

    /// Highest number of concurrent `create_clip` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call is cancelled.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserAutomation for MockBrowserAutomation {
    async fn create_clip(
        &self,
        video_url: &str,
        account: &AutomationAccount,
        title: Option<&str>,
    ) -> Result<Option<String>, AutomationError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));

        let call_number = {
            let mut calls = self.calls.write().await;
            calls.push(RecordedClipCall {
                video_url: video_url.to_string(),
                account_id: account.id.clone(),
                title: title.map(String::from),
            });
            calls.len()
        };

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(outcome) = self.outcomes.write().await.pop_front() {
            return outcome;
        }
        if let Some(error) = self.sticky_error.read().await.clone() {
            return Err(error);
        }
        Ok(Some(format!("https://www.youtube.com/clip/mock-{}", call_number)))
    }

    async fn test_connection(&self) -> bool {
        *self.connected.read().await
    }
}
