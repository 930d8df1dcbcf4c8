use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Pool capacity, worker count and clip attempts are non-zero
/// - Coefficients are positive and finite
/// - Metadata lookups and dedup locks have non-zero timeouts
/// - Dedup polling fits inside the wait window
/// - The dispatch lease outlives the clip deadline, so a message is not
///   redelivered while its order is still being worked on
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.automation.pool_capacity == 0 {
        return Err(invalid("automation.pool_capacity must be at least 1"));
    }

    if config.dispatch.workers == 0 {
        return Err(invalid("dispatch.workers must be at least 1"));
    }

    if config.fulfillment.max_clip_attempts == 0 {
        return Err(invalid("fulfillment.max_clip_attempts must be at least 1"));
    }

    for (name, value) in [
        ("coefficient.with_clip", config.coefficient.with_clip),
        ("coefficient.without_clip", config.coefficient.without_clip),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid(&format!("{} must be a positive number", name)));
        }
    }

    if config.fulfillment.metadata_timeout_secs == 0 {
        return Err(invalid("fulfillment.metadata_timeout_secs must be at least 1"));
    }

    if config.dedup.lock_ttl_secs == 0 {
        return Err(invalid("dedup.lock_ttl_secs must be at least 1"));
    }

    if config.dedup.poll_interval_ms == 0 {
        return Err(invalid("dedup.poll_interval_ms must be at least 1"));
    }

    if config.dedup.poll_interval() > config.dedup.max_wait() {
        return Err(invalid(
            "dedup.poll_interval_ms must not exceed dedup.max_wait_secs",
        ));
    }

    if config.dispatch.lease_secs <= config.fulfillment.clip_deadline_secs {
        return Err(invalid(
            "dispatch.lease_secs must be greater than fulfillment.clip_deadline_secs",
        ));
    }

    for account in &config.automation.accounts {
        if account.id.trim().is_empty() {
            return Err(invalid("automation.accounts[].id cannot be empty"));
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
