//! Write timestamps, in microseconds since the Unix epoch.
//!
//! The server keeps the write with the highest timestamp, so the generator
//! decides which of two racing writes wins.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Source of write timestamps.
pub trait TimestampGenerator: Send + Sync {
    /// A new timestamp, in microseconds since the Unix epoch.
    fn next_timestamp(&self) -> i64;
}

/// The wall clock. Two calls within one microsecond return the same value; a
/// clock before the epoch yields 0.
#[derive(Default, Debug)]
pub struct SimpleTimestampGenerator {}

impl SimpleTimestampGenerator {
    /// Creates the generator.
    pub fn new() -> Self {
        SimpleTimestampGenerator {}
    }
}

impl TimestampGenerator for SimpleTimestampGenerator {
    fn next_timestamp(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct SkewWarnings {
    threshold: Duration,
    interval: Duration,
}

/// Strictly increasing timestamps, shared by every thread using one instance.
///
/// When the clock does not move past the last timestamp, the last one plus one
/// is returned. A clock more than `threshold` behind is reported with a warning,
/// at most once per `interval` (both 1 s by default). Separate instances give no
/// ordering guarantee between each other.
#[derive(Debug)]
pub struct MonotonicTimestampGenerator {
    last: AtomicI64,
    last_warning: Mutex<Option<Instant>>,
    warnings: Option<SkewWarnings>,
}

impl MonotonicTimestampGenerator {
    /// Creates the generator, warning about clock skew with the default settings.
    pub fn new() -> Self {
        MonotonicTimestampGenerator {
            last: AtomicI64::new(0),
            last_warning: Mutex::new(None),
            warnings: Some(SkewWarnings {
                threshold: Duration::from_secs(1),
                interval: Duration::from_secs(1),
            }),
        }
    }

    /// Sets how big a clock skew must be to be reported, and how often it is reported.
    pub fn with_warning_times(
        mut self,
        warning_threshold: Duration,
        warning_interval: Duration,
    ) -> Self {
        self.warnings = Some(SkewWarnings {
            threshold: warning_threshold,
            interval: warning_interval,
        });
        self
    }

    /// Disables clock skew warnings.
    pub fn without_warnings(mut self) -> Self {
        self.warnings = None;
        self
    }

    fn compute_next(&self, last: i64) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => {
                let now = now.as_micros() as i64;
                if now > last {
                    return now;
                }
                if let Some(warnings) = &self.warnings {
                    if last - now > warnings.threshold.as_micros() as i64 {
                        self.maybe_warn(warnings, now, last);
                    }
                }
            }
            Err(_) => warn!("Clock skew detected: the current time is before the Unix epoch"),
        }
        last + 1
    }

    fn maybe_warn(&self, warnings: &SkewWarnings, now: i64, last: i64) {
        let mut last_warning = self
            .last_warning
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let instant = Instant::now();
        if last_warning.is_some_and(|prev| instant.duration_since(prev) < warnings.interval) {
            return;
        }
        *last_warning = Some(instant);
        drop(last_warning);
        warn!(
            clock = now,
            last_timestamp = last,
            behind_us = last - now,
            "Clock skew detected, timestamps are incremented artificially"
        );
    }
}

impl Default for MonotonicTimestampGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampGenerator for MonotonicTimestampGenerator {
    fn next_timestamp(&self) -> i64 {
        loop {
            let last = self.last.load(Ordering::SeqCst);
            let next = self.compute_next(last);
            if self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::{MonotonicTimestampGenerator, SimpleTimestampGenerator, TimestampGenerator};

    #[test]
    fn monotonic_timestamp_generator_is_monotonic() {
        const NUMBER_OF_ITERATIONS: u32 = 1000;

        let mut prev = None;
        let generator = MonotonicTimestampGenerator::new();
        for _ in 0..NUMBER_OF_ITERATIONS {
            let cur = generator.next_timestamp();
            if let Some(prev_val) = prev {
                assert!(cur > prev_val);
            }
            prev = Some(cur);
        }
    }

    #[test]
    fn monotonic_timestamp_generator_is_monotonic_with_concurrency() {
        const NUMBER_OF_ITERATIONS: usize = 1000;
        const NUMBER_OF_THREADS: usize = 10;
        let generator = Arc::new(MonotonicTimestampGenerator::new());
        let timestamps_sets: Vec<HashSet<i64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..NUMBER_OF_THREADS)
                .map(|_| {
                    s.spawn(|| {
                        let timestamps: Vec<i64> = (0..NUMBER_OF_ITERATIONS)
                            .map(|_| generator.next_timestamp())
                            .collect();
                        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
                        let timestamps_set: HashSet<i64> = HashSet::from_iter(timestamps);
                        assert_eq!(
                            timestamps_set.len(),
                            NUMBER_OF_ITERATIONS,
                            "Colliding values in a single thread"
                        );
                        timestamps_set
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let full_set: HashSet<i64> = timestamps_sets.iter().flatten().copied().collect();
        assert_eq!(
            full_set.len(),
            NUMBER_OF_ITERATIONS * NUMBER_OF_THREADS,
            "Colliding values between threads"
        );
    }

    #[test]
    fn monotonic_timestamp_generator_survives_clock_behind_last() {
        let generator = MonotonicTimestampGenerator::new().without_warnings();
        // Pretend a timestamp far in the future was already handed out.
        let future = SimpleTimestampGenerator::new().next_timestamp() + 3_600_000_000;
        generator.last.store(future, Ordering::SeqCst);
        assert_eq!(generator.next_timestamp(), future + 1);
        assert_eq!(generator.next_timestamp(), future + 2);
    }

    #[test]
    fn simple_timestamp_generator_is_wall_clock() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_micros() as i64;
        let ts = SimpleTimestampGenerator::new().next_timestamp();
        assert!(ts >= before);
    }
}
