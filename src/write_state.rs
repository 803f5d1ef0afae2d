//! Writability classification from ping outcomes.

use std::time::Instant;

use crate::config::ConnectionConfig;

/// How confident we are that packets sent on this pair arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Ping responses have been received recently.
    Writable,
    /// A few checks have gone unanswered.
    WriteUnreliable,
    /// No check has ever been answered.
    WriteInit,
    /// So many checks went unanswered that we have written the pair off.
    WriteTimeout,
}

/// Re-derives the write state from the unanswered-ping record whenever the
/// connection is ticked or a check concludes.
#[derive(Debug)]
pub struct WriteStateTracker {
    state: WriteState,
    created_at: Instant,
}

impl WriteStateTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            state: WriteState::WriteInit,
            created_at: now,
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Overrides the state without reporting a transition. Used when
    /// learned state is deliberately forgotten.
    pub fn set(&mut self, state: WriteState) {
        self.state = state;
    }

    /// Reclassifies and returns `(from, to)` if the state changed.
    ///
    /// `failures` is the number of unanswered checks plus transport send
    /// failures since the last response, `last_response` the time the most
    /// recent check was answered (`None` if none ever was). When both the
    /// write-off and the unreliable condition hold, the write-off wins.
    pub fn classify(
        &mut self,
        now: Instant,
        config: &ConnectionConfig,
        failures: usize,
        last_response: Option<Instant>,
    ) -> Option<(WriteState, WriteState)> {
        let next = match last_response {
            None => {
                let many_failures = failures >= config.write_connect_failures;
                let out_of_time =
                    now.saturating_duration_since(self.created_at) >= config.write_connect_timeout;

                if many_failures && out_of_time {
                    WriteState::WriteTimeout
                } else {
                    WriteState::WriteInit
                }
            }
            Some(last_response) => {
                let since_response = now.saturating_duration_since(last_response);

                if since_response >= config.inactive_timeout
                    && failures >= config.write_timeout_failures
                {
                    WriteState::WriteTimeout
                } else if since_response >= config.unwritable_timeout
                    || failures >= config.unwritable_min_checks
                {
                    WriteState::WriteUnreliable
                } else {
                    WriteState::Writable
                }
            }
        };

        let previous = self.state;
        if next == previous {
            return None;
        }

        self.state = next;
        Some((previous, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    #[test]
    fn starts_in_init_and_stays_there_without_evidence() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);

        assert_eq!(tracker.state(), WriteState::WriteInit);
        assert_eq!(tracker.classify(start + Duration::from_secs(60), &config(), 0, None), None);
    }

    #[test]
    fn never_answered_pairs_time_out_on_failures_and_elapsed_time() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);
        let config = config();

        // Five failures alone are not enough.
        assert_eq!(tracker.classify(start + Duration::from_secs(1), &config, 5, None), None);

        // Fifteen seconds alone are not enough either.
        assert_eq!(tracker.classify(start + Duration::from_secs(15), &config, 4, None), None);

        assert_eq!(
            tracker.classify(start + Duration::from_secs(15), &config, 5, None),
            Some((WriteState::WriteInit, WriteState::WriteTimeout))
        );
    }

    #[test]
    fn never_answered_pairs_skip_unreliable() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);

        // More outstanding pings than the unreliable threshold, but no
        // response ever: stays in init.
        assert_eq!(tracker.classify(start + Duration::from_secs(1), &config(), 10, None), None);
        assert_eq!(tracker.state(), WriteState::WriteInit);
    }

    #[test]
    fn a_response_makes_the_pair_writable() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);

        assert_eq!(
            tracker.classify(start + Duration::from_millis(50), &config(), 0, Some(start)),
            Some((WriteState::WriteInit, WriteState::Writable))
        );
    }

    #[test]
    fn unanswered_checks_degrade_to_unreliable() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);
        let config = config();

        tracker.classify(start, &config, 0, Some(start));

        assert_eq!(tracker.classify(start + Duration::from_secs(1), &config, 5, Some(start)), None);
        assert_eq!(
            tracker.classify(start + Duration::from_secs(1), &config, 6, Some(start)),
            Some((WriteState::Writable, WriteState::WriteUnreliable))
        );
    }

    #[test]
    fn silence_alone_degrades_to_unreliable() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);
        let config = config();

        tracker.classify(start, &config, 0, Some(start));

        assert_eq!(
            tracker.classify(start + Duration::from_secs(10), &config, 0, Some(start)),
            Some((WriteState::Writable, WriteState::WriteUnreliable))
        );
    }

    #[test]
    fn write_timeout_dominates_unreliable() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);
        let config = config();

        tracker.classify(start, &config, 0, Some(start));

        // Both the unreliable and the write-off condition hold.
        assert_eq!(
            tracker.classify(start + Duration::from_secs(30), &config, 20, Some(start)),
            Some((WriteState::Writable, WriteState::WriteTimeout))
        );
    }

    #[test]
    fn long_silence_without_enough_failures_is_only_unreliable() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);
        let config = config();

        tracker.classify(start, &config, 0, Some(start));

        assert_eq!(
            tracker.classify(start + Duration::from_secs(30), &config, 19, Some(start)),
            Some((WriteState::Writable, WriteState::WriteUnreliable))
        );
    }

    #[test]
    fn recovery_reports_a_single_transition() {
        let start = Instant::now();
        let mut tracker = WriteStateTracker::new(start);
        let config = config();

        tracker.classify(start + Duration::from_secs(1), &config, 6, Some(start));
        assert_eq!(tracker.state(), WriteState::WriteUnreliable);

        let response_at = start + Duration::from_secs(2);
        assert_eq!(
            tracker.classify(response_at, &config, 0, Some(response_at)),
            Some((WriteState::WriteUnreliable, WriteState::Writable))
        );
        assert_eq!(tracker.classify(response_at, &config, 0, Some(response_at)), None);
    }
}
