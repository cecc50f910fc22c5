//! Explicit TTL cache with an injectable clock.
//!
//! Used to remember the remote release identity across repeated boot checks
//! within one process. The owner constructs it with a TTL; nothing here is
//! global.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Single-slot cache whose value expires `ttl` after it was stored.
#[derive(Debug)]
pub struct TtlCache<T, C: Clock = SystemClock> {
    ttl: Duration,
    clock: C,
    entry: Option<(DateTime<Utc>, T)>,
}

impl<T: Clone> TtlCache<T, SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<T: Clone, C: Clock> TtlCache<T, C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            ttl,
            clock,
            entry: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if it is younger than the TTL.
    pub fn get(&self) -> Option<T> {
        let (stored_at, value) = self.entry.as_ref()?;
        if self.clock.now() - *stored_at < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&mut self, value: T) {
        self.entry = Some((self.clock.now(), value));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap()
        }
    }

    #[test]
    fn value_expires_after_ttl() {
        let clock = Arc::new(ManualClock(AtomicI64::new(1_700_000_000)));
        let mut cache = TtlCache::with_clock(Duration::seconds(60), clock.clone());
        assert_eq!(cache.get(), None::<u32>);
        cache.put(7u32);
        clock.advance(59);
        assert_eq!(cache.get(), Some(7));
        clock.advance(1);
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn invalidate_and_zero_ttl() {
        let clock = Arc::new(ManualClock(AtomicI64::new(0)));
        let mut cache = TtlCache::with_clock(Duration::seconds(10), clock.clone());
        cache.put("a".to_string());
        cache.invalidate();
        assert_eq!(cache.get(), None);

        let mut never = TtlCache::with_clock(Duration::zero(), clock);
        never.put(1);
        assert_eq!(never.get(), None);
    }
}
