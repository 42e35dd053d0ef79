//! Per-request admission check used by the HTTP middleware.

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::backend::Limiter;
use super::clock::millis;
use super::key::RateLimitKey;
use super::rules::{Rule, RuleSet};
use crate::error::Result;

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed,
    /// The caller is over its quota for the current window.
    Denied {
        /// Key the call was counted against
        key: RateLimitKey,
        /// Rule that was exceeded
        rule: Rule,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// HTTP status the request layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Decision::Allowed => 200,
            Decision::Denied { .. } => 429,
        }
    }
}

/// Derives keys and rules for inbound requests and consults the limiter.
pub struct RateLimitGuard<L: Limiter + ?Sized> {
    limiter: Arc<L>,
    rules: Arc<RuleSet>,
}

impl<L: Limiter + ?Sized> Clone for RateLimitGuard<L> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            rules: self.rules.clone(),
        }
    }
}

impl<L: Limiter + ?Sized> RateLimitGuard<L> {
    /// Create a guard over `limiter` applying `rules`.
    pub fn new(limiter: Arc<L>, rules: Arc<RuleSet>) -> Self {
        Self { limiter, rules }
    }

    /// Count a call by `caller` to `operation` and decide whether it proceeds.
    ///
    /// Store failures are returned as errors and answered with a server error
    /// upstream; they are never treated as an admission.
    pub async fn check(&self, operation: &str, caller: &str) -> Result<Decision> {
        let key = RateLimitKey::new(operation, caller);
        let rule = self.rules.resolve(operation);

        let allowed = self
            .limiter
            .allow(&key.to_string_key(), rule.rate(), rule.window())
            .await
            .map_err(|e| {
                error!(operation = %operation, key = %key, error = %e, "Rate limiter error");
                e
            })?;

        if allowed {
            debug!(key = %key, "Request admitted");
            return Ok(Decision::Allowed);
        }

        warn!(
            operation = %operation,
            key = %key,
            rate = rule.rate(),
            window_ms = millis(rule.window()),
            "Rate limit exceeded"
        );
        Ok(Decision::Denied { key, rule })
    }

    /// Clear the quota of `caller` for `operation`.
    pub async fn reset(&self, operation: &str, caller: &str) -> Result<()> {
        let key = RateLimitKey::new(operation, caller);
        self.limiter.reset(&key.to_string_key()).await
    }

    /// Calls counted for `caller` on `operation` in the current window.
    pub async fn count(&self, operation: &str, caller: &str) -> Result<u32> {
        let key = RateLimitKey::new(operation, caller);
        self.limiter.get_count(&key.to_string_key()).await
    }

    /// The rules this guard applies.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}
