//! Fixed-window bucket bookkeeping.

use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on a window so `now + window` cannot overflow.
const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The counter and deadline of the current window for one key.
///
/// Once `now >= reset_at` the bucket is expired and counts as absent,
/// whatever its stored count says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Calls admitted in the current window
    count: u32,
    /// When the current window ends
    reset_at: Instant,
}

impl Bucket {
    /// Open a new window at `now`, already counting the call that opened it.
    pub fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now + window.min(MAX_WINDOW),
        }
    }

    /// Whether the window has ended.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }

    /// Admit one more call if the window still has room.
    ///
    /// A full bucket is left untouched.
    pub fn try_acquire(&mut self, rate: u32) -> bool {
        if self.count >= rate {
            return false;
        }
        self.count += 1;
        true
    }

    /// The count as seen at `now`: zero once the window has ended.
    pub fn count_at(&self, now: Instant) -> u32 {
        if self.is_expired(now) {
            0
        } else {
            self.count
        }
    }

    /// Time left until the window ends.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}

/// Apply one fixed-window admission step to the bucket stored for a key.
///
/// `slot` is the stored bucket, if any. Returns the admission decision and,
/// when a new window has to be opened, the bucket to store.
pub(crate) fn admit(
    slot: Option<&mut Bucket>,
    now: Instant,
    rate: u32,
    window: Duration,
) -> (bool, Option<Bucket>) {
    match slot {
        Some(bucket) if !bucket.is_expired(now) => (bucket.try_acquire(rate), None),
        _ => (true, Some(Bucket::open(now, window))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_counts_first_call() {
        let now = Instant::now();
        let bucket = Bucket::open(now, Duration::from_secs(2));

        assert_eq!(bucket.count_at(now), 1);
        assert_eq!(bucket.duration_until_reset(now), Duration::from_secs(2));
    }

    #[test]
    fn test_expiry_is_inclusive_of_deadline() {
        let now = Instant::now();
        let bucket = Bucket::open(now, Duration::from_secs(2));

        assert!(!bucket.is_expired(now + Duration::from_millis(1999)));
        assert!(bucket.is_expired(now + Duration::from_secs(2)));
        assert_eq!(bucket.count_at(now + Duration::from_secs(2)), 0);
        assert_eq!(bucket.duration_until_reset(now + Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn test_try_acquire_stops_at_rate() {
        let mut bucket = Bucket::open(Instant::now(), Duration::from_secs(1));

        assert!(bucket.try_acquire(3));
        assert!(bucket.try_acquire(3));
        assert!(!bucket.try_acquire(3));
        assert_eq!(bucket.count_at(Instant::now()), 3);
    }

    #[test]
    fn test_admit_opens_window_for_expired_bucket() {
        let now = Instant::now();
        let mut stale = Bucket::open(now, Duration::from_secs(1));
        stale.try_acquire(10);

        let later = now + Duration::from_secs(1);
        let (allowed, fresh) = admit(Some(&mut stale), later, 10, Duration::from_secs(1));

        assert!(allowed);
        assert_eq!(fresh, Some(Bucket::open(later, Duration::from_secs(1))));
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let bucket = Bucket::open(Instant::now(), Duration::MAX);
        assert!(!bucket.is_expired(Instant::now()));
    }
}
