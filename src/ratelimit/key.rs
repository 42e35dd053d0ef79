//! Rate limit key derivation.

use std::fmt;

/// Identifies whose quota a call counts against.
///
/// The store only needs an opaque string; this type produces the
/// conventional `operation:caller` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The logical operation being called
    pub operation: String,
    /// The caller identity, typically a client address
    pub caller: String,
}

impl RateLimitKey {
    /// Create a key for `caller` calling `operation`.
    pub fn new(operation: &str, caller: &str) -> Self {
        Self {
            operation: operation.to_string(),
            caller: caller.to_string(),
        }
    }

    /// The string stored in the bucket map.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.operation, self.caller)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.caller)
    }
}
