use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fulfillment: FulfillmentConfig,
    #[serde(default)]
    pub coefficient: CoefficientConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Server configuration (health, status and metrics endpoints)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("viewrelay.db")
}

/// Order fulfillment settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FulfillmentConfig {
    /// When false, orders skip clip creation and use the without-clip coefficient.
    #[serde(default = "default_true")]
    pub clip_enabled: bool,

    /// Maximum clip attempts per order (permanent failures stop after one).
    #[serde(default = "default_max_clip_attempts")]
    pub max_clip_attempts: u32,

    /// Fixed delay between temporary clip failures (milliseconds).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Videos shorter than this cannot be clipped.
    #[serde(default = "default_min_video_duration")]
    pub min_video_duration_secs: u64,

    /// Overall deadline for the clip phase, dedup wait included.
    #[serde(default = "default_clip_deadline")]
    pub clip_deadline_secs: u64,

    /// Timeout for the traffic-routing call in the finish phase.
    #[serde(default = "default_routing_timeout")]
    pub traffic_routing_timeout_secs: u64,

    /// Timeout for each video metadata lookup (view count, details).
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Reload-and-retry budget for optimistic version conflicts per phase.
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,

    /// TTL of the monitoring snapshot written after the finish phase.
    #[serde(default = "default_week_secs")]
    pub monitoring_ttl_secs: u64,
}

impl FulfillmentConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn clip_deadline(&self) -> Duration {
        Duration::from_secs(self.clip_deadline_secs)
    }

    pub fn traffic_routing_timeout(&self) -> Duration {
        Duration::from_secs(self.traffic_routing_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn monitoring_ttl(&self) -> Duration {
        Duration::from_secs(self.monitoring_ttl_secs)
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            clip_enabled: true,
            max_clip_attempts: default_max_clip_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            min_video_duration_secs: default_min_video_duration(),
            clip_deadline_secs: default_clip_deadline(),
            traffic_routing_timeout_secs: default_routing_timeout(),
            metadata_timeout_secs: default_metadata_timeout(),
            max_conflict_retries: default_conflict_retries(),
            monitoring_ttl_secs: default_week_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_clip_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_min_video_duration() -> u64 {
    60
}

fn default_clip_deadline() -> u64 {
    600 // 10 minutes
}

fn default_routing_timeout() -> u64 {
    30
}

fn default_metadata_timeout() -> u64 {
    15
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_week_secs() -> u64 {
    7 * 24 * 60 * 60
}

/// Delivery coefficients (clicks required per ordered view).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CoefficientConfig {
    #[serde(default = "default_with_clip")]
    pub with_clip: f64,
    #[serde(default = "default_without_clip")]
    pub without_clip: f64,
}

impl Default for CoefficientConfig {
    fn default() -> Self {
        Self {
            with_clip: default_with_clip(),
            without_clip: default_without_clip(),
        }
    }
}

fn default_with_clip() -> f64 {
    3.0
}

fn default_without_clip() -> f64 {
    4.0
}

/// Shared browser-automation farm settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutomationConfig {
    /// Concurrent automation sessions allowed. Keep below the farm's real
    /// capacity (e.g. 6 for a 10-session farm).
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Automation identities available to the built-in account pool.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            accounts: Vec::new(),
        }
    }
}

fn default_pool_capacity() -> usize {
    6
}

/// A configured automation account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub id: String,
    pub email: String,
    /// Maximum clips per day for this account (0 = unlimited).
    #[serde(default)]
    pub daily_limit: u32,
}

/// Dedup lock and result cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupConfig {
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_week_secs")]
    pub result_ttl_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

impl DedupConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl(),
            result_ttl_secs: default_week_secs(),
            poll_interval_ms: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

fn default_lock_ttl() -> u64 {
    300 // 5 minutes
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_max_wait() -> u64 {
    240 // 4 minutes
}

/// Inbound queue consumer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Orders processed in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often to poll the queue when it is empty (milliseconds).
    #[serde(default = "default_dispatch_poll")]
    pub poll_interval_ms: u64,

    /// Visibility lease of a received message. Unacked messages are
    /// redelivered once it expires.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    /// How long `stop` waits for in-flight orders before aborting them.
    #[serde(default = "default_grace")]
    pub shutdown_grace_secs: u64,
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_dispatch_poll(),
            lease_secs: default_lease(),
            shutdown_grace_secs: default_grace(),
        }
    }
}

fn default_workers() -> usize {
    3
}

fn default_dispatch_poll() -> u64 {
    1000
}

fn default_lease() -> u64 {
    900 // 15 minutes
}

fn default_grace() -> u64 {
    30
}
