//! Throughput measurement over a sliding window.

use std::time::{Duration, Instant};

const BUCKET_WIDTH: Duration = Duration::from_millis(100);
const BUCKET_COUNT: usize = 20;

/// Counts units (bytes, packets) in fixed-width buckets and reports the rate
/// across the whole window. One instance per direction.
#[derive(Debug, Clone)]
pub struct RateTracker {
    buckets: [u64; BUCKET_COUNT],
    head: usize,
    head_start: Option<Instant>,
    total: u64,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self {
            buckets: [0; BUCKET_COUNT],
            head: 0,
            head_start: None,
            total: 0,
        }
    }
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, now: Instant, units: u64) {
        self.advance(now);
        self.buckets[self.head] += units;
        self.total += units;
    }

    /// Units per second over the window ending at `now`.
    pub fn rate(&self, now: Instant) -> f64 {
        let Some(head_start) = self.head_start else {
            return 0.0;
        };

        let window = BUCKET_WIDTH * BUCKET_COUNT as u32;
        if now.saturating_duration_since(head_start) >= window {
            return 0.0;
        }

        // Buckets that fell out of the window since the last `record` call
        // are skipped rather than eagerly zeroed.
        let elapsed_buckets =
            (now.saturating_duration_since(head_start).as_nanos() / BUCKET_WIDTH.as_nanos()) as usize;
        let live_buckets = BUCKET_COUNT - elapsed_buckets;

        let sum: u64 = (0..live_buckets)
            .map(|age| self.buckets[(self.head + BUCKET_COUNT - age) % BUCKET_COUNT])
            .sum();

        sum as f64 / window.as_secs_f64()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn advance(&mut self, now: Instant) {
        let Some(head_start) = self.head_start else {
            self.head_start = Some(now);
            return;
        };

        let elapsed = now.saturating_duration_since(head_start);
        if elapsed >= BUCKET_WIDTH * BUCKET_COUNT as u32 {
            self.buckets = [0; BUCKET_COUNT];
            self.head_start = Some(now);
            return;
        }

        let steps = (elapsed.as_nanos() / BUCKET_WIDTH.as_nanos()) as usize;
        for _ in 0..steps {
            self.head = (self.head + 1) % BUCKET_COUNT;
            self.buckets[self.head] = 0;
        }
        if steps > 0 {
            self.head_start = Some(head_start + BUCKET_WIDTH * steps as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_rate_over_the_window() {
        let start = Instant::now();
        let mut tracker = RateTracker::new();

        // 1000 units spread over one second.
        for i in 0..10u32 {
            tracker.record(start + i * Duration::from_millis(100), 100);
        }

        let rate = tracker.rate(start + Duration::from_millis(900));
        assert_eq!(rate, 500.0); // 1000 units over a 2 s window

        assert_eq!(tracker.total(), 1000);
    }

    #[test]
    fn old_traffic_falls_out_of_the_window() {
        let start = Instant::now();
        let mut tracker = RateTracker::new();

        tracker.record(start, 1000);

        assert!(tracker.rate(start + Duration::from_millis(100)) > 0.0);
        assert_eq!(tracker.rate(start + Duration::from_secs(10)), 0.0);
        assert_eq!(tracker.total(), 1000);
    }

    #[test]
    fn gap_longer_than_the_window_clears_all_buckets() {
        let start = Instant::now();
        let mut tracker = RateTracker::new();

        tracker.record(start, 1000);
        tracker.record(start + Duration::from_secs(30), 100);

        let rate = tracker.rate(start + Duration::from_secs(30) + Duration::from_millis(100));
        assert_eq!(rate, 50.0);
    }
}
