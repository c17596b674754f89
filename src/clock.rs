//! Injected time and id providers.
//!
//! The scheduler and caches take these as trait objects so tests can pin
//! wall-clock time and job ids deterministically.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of job identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// UUIDv4 implementation.
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    /// Clock pinned to an epoch offset, advanced manually.
    pub struct ManualClock {
        offset_secs: AtomicI64,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                offset_secs: AtomicI64::new(0),
            }
        }

        pub fn advance_secs(&self, secs: i64) {
            self.offset_secs.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_opt(1_700_000_000 + self.offset_secs.load(Ordering::SeqCst), 0)
                .unwrap()
        }
    }

    /// Sequential id generator: `job-1`, `job-2`, ...
    pub struct SequentialIds {
        counter: AtomicU64,
    }

    impl SequentialIds {
        pub fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> String {
            format!("job-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }
}
