use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use weft_core::config::RetryConfig;
use weft_core::error::CapabilityError;
use weft_core::traits::Capability;
use weft_core::value::Value;

/// A capability that retries transient failures and falls back to
/// alternative capabilities once the primary is exhausted.
///
/// The engine never retries on its own; wrap a capability in this to opt in.
pub struct RetryingCapability {
    name: String,
    primary: Arc<dyn Capability>,
    fallbacks: Vec<Arc<dyn Capability>>,
    retry_config: RetryConfig,
}

impl RetryingCapability {
    pub fn new(primary: Arc<dyn Capability>, retry_config: RetryConfig) -> Self {
        Self {
            name: format!("retrying({})", primary.name()),
            primary,
            fallbacks: vec![],
            retry_config,
        }
    }

    /// Tried in order, once each, after the primary gives up.
    pub fn with_fallback(mut self, fallback: Arc<dyn Capability>) -> Self {
        self.fallbacks.push(fallback);
        self
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl Capability for RetryingCapability {
    fn invoke(&self, instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.invoke(instruction.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        if e.is_retryable() && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                capability = %self.primary.name(),
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying capability"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!(capability = %self.primary.name(), "Primary capability exhausted, trying fallbacks");
            }
            for fallback in &self.fallbacks {
                match fallback.invoke(instruction.clone()).await {
                    Ok(value) => {
                        info!(capability = %fallback.name(), "Fell back to alternative capability");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(capability = %fallback.name(), error = %e, "Fallback capability also failed");
                        last_err = Some(e);
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| CapabilityError::failed("all capabilities failed")))
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
