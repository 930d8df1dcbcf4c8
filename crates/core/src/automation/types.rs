use serde::{Deserialize, Serialize};

/// Metadata about a video relevant to clip eligibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Duration hint. `None` when the provider does not know it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// The creator turned clipping off.
    #[serde(default)]
    pub clips_disabled: bool,
    #[serde(default)]
    pub age_restricted: bool,
}

/// An automation identity used to sign in to the video platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutomationAccount {
    pub id: String,
    pub email: String,
}

impl AutomationAccount {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// Outcome reported by the traffic router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRoutingResult {
    pub success: bool,
    pub campaigns_created: u32,
    #[serde(default)]
    pub message: String,
}

impl TrafficRoutingResult {
    pub fn succeeded(campaigns_created: u32) -> Self {
        Self {
            success: true,
            campaigns_created,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            campaigns_created: 0,
            message: message.into(),
        }
    }
}
