//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod guard;
mod key;
mod limiter;
mod rules;
mod sharded;
mod sweeper;

pub use backend::{start, Limiter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::{Decision, RateLimitGuard};
pub use key::RateLimitKey;
pub use limiter::MemoryLimiter;
pub use rules::{Rule, RuleConfig, RuleSet};
pub use sharded::ShardedLimiter;
pub use sweeper::{Sweep, Sweeper, SweeperHandle};
