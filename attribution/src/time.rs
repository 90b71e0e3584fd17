use std::sync::atomic::{AtomicI64, Ordering};

pub trait TimeSource {
    // Return the current time as epoch milliseconds
    fn now_millis(&self) -> i64;
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now_millis(&self) -> i64 {
        (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Deterministic clock for tests: starts at a fixed instant and only moves
/// when explicitly advanced.
pub struct FixedTime {
    millis: AtomicI64,
}

impl FixedTime {
    pub fn new(millis: i64) -> FixedTime {
        FixedTime {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTime {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
