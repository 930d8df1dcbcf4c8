//! Delivery coefficient: how many clicks to route per ordered view.
//!
//! A clip converts better than the bare video, so orders with a clip need
//! fewer clicks.

use serde::Serialize;

use crate::config::CoefficientConfig;

/// Coefficient for an order, depending on whether a clip is the target.
pub fn coefficient_for(clip_created: bool, config: &CoefficientConfig) -> f64 {
    if clip_created {
        config.with_clip
    } else {
        config.without_clip
    }
}

/// `ceil(target_views * coefficient)`.
pub fn required_clicks(target_views: u64, coefficient: f64) -> u64 {
    (target_views as f64 * coefficient).ceil() as u64
}

/// Coefficient and click volume computed together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeliveryPlan {
    pub coefficient: f64,
    pub required_clicks: u64,
}

impl DeliveryPlan {
    pub fn calculate(target_views: u64, clip_created: bool, config: &CoefficientConfig) -> Self {
        let coefficient = coefficient_for(clip_created, config);
        Self {
            coefficient,
            required_clicks: required_clicks(target_views, coefficient),
        }
    }
}
