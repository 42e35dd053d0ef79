//! Rate limit rules and their resolution by operation name.
//!
//! Rules are validated once, when the rule set is built. Resolution never
//! fails: operations without their own rule get the default one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::clock::millis;
use crate::config::RateLimitingConfig;
use crate::error::{GatekeeperError, Result};

/// Name reported for the default rule in validation errors.
const DEFAULT_RULE_NAME: &str = "default";

/// A rule as written in configuration.
///
/// The window is given either in whole seconds or in milliseconds, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Maximum number of calls per window
    pub rate: u32,
    /// Window length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    /// Window length in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
}

impl RuleConfig {
    /// A rule with a window of `window_secs` seconds.
    pub fn per_secs(rate: u32, window_secs: u64) -> Self {
        Self {
            rate,
            window_secs: Some(window_secs),
            window_ms: None,
        }
    }

    /// A rule with a window of `window_ms` milliseconds.
    pub fn per_millis(rate: u32, window_ms: u64) -> Self {
        Self {
            rate,
            window_secs: None,
            window_ms: Some(window_ms),
        }
    }

    /// Validate into a [`Rule`]; `name` is only used for error reporting.
    pub fn to_rule(&self, name: &str) -> Result<Rule> {
        let window = match (self.window_secs, self.window_ms) {
            (Some(secs), None) => Duration::from_secs(secs),
            (None, Some(ms)) => Duration::from_millis(ms),
            (Some(_), Some(_)) => {
                return Err(GatekeeperError::InvalidRule {
                    name: name.to_string(),
                    reason: "set either window_secs or window_ms, not both".to_string(),
                })
            }
            (None, None) => {
                return Err(GatekeeperError::InvalidRule {
                    name: name.to_string(),
                    reason: "window_secs or window_ms is required".to_string(),
                })
            }
        };
        Rule::named(name, self.rate, window)
    }
}

/// A validated rate limit: at most `rate` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    rate: u32,
    window: Duration,
}

impl Rule {
    /// Create a rule, rejecting a zero rate or an empty window.
    pub fn new(rate: u32, window: Duration) -> Result<Self> {
        Self::named("unnamed", rate, window)
    }

    fn named(name: &str, rate: u32, window: Duration) -> Result<Self> {
        if rate == 0 {
            return Err(GatekeeperError::InvalidRule {
                name: name.to_string(),
                reason: "rate must be greater than zero".to_string(),
            });
        }
        if window.is_zero() {
            return Err(GatekeeperError::InvalidRule {
                name: name.to_string(),
                reason: "window must be greater than zero".to_string(),
            });
        }
        Ok(Self { rate, window })
    }

    /// Maximum number of calls per window.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Per-operation rules plus the fallback for everything else.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: HashMap<String, Rule>,
    default_rule: Rule,
}

impl RuleSet {
    /// Create a rule set with no per-operation rules.
    pub fn new(default_rule: Rule) -> Self {
        Self {
            rules: HashMap::new(),
            default_rule,
        }
    }

    /// Add or replace the rule for `operation`.
    pub fn with_rule(mut self, operation: impl Into<String>, rule: Rule) -> Self {
        self.rules.insert(operation.into(), rule);
        self
    }

    /// Build and validate the rule set described by `config`.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let default_rule = config.default_rule.to_rule(DEFAULT_RULE_NAME)?;

        let mut rules = HashMap::with_capacity(config.rules.len());
        for (operation, rule) in &config.rules {
            rules.insert(operation.clone(), rule.to_rule(operation)?);
        }

        info!(
            rules = rules.len(),
            default_rate = default_rule.rate,
            default_window_ms = millis(default_rule.window),
            "Rate limit rules loaded"
        );

        Ok(Self {
            rules,
            default_rule,
        })
    }

    /// The rule for `operation`, or the default rule if it has none.
    pub fn resolve(&self, operation: &str) -> Rule {
        self.rules
            .get(operation)
            .copied()
            .unwrap_or(self.default_rule)
    }

    /// The fallback rule.
    pub fn default_rule(&self) -> Rule {
        self.default_rule
    }

    /// Per-operation rules, sorted by operation name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Rule)> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .map(|(operation, rule)| (operation.as_str(), *rule))
            .collect();
        rules.sort_by(|a, b| a.0.cmp(b.0));
        rules.into_iter()
    }

    /// Number of per-operation rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether only the default rule is configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
