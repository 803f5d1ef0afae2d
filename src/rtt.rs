//! Round-trip time estimation.

use std::time::{Duration, Instant};

/// An exponential moving average whose smoothing factor depends on the age
/// of the previous observation rather than on a fixed sample rate.
///
/// Ping responses arrive at wildly irregular intervals (the scheduler backs
/// off on stable pairs), so a classic per-sample EMA would weight a sample
/// after 48 ms of silence the same as one after 25 s. Here a sample's weight
/// grows with the time since the last one: after one half-life the old
/// average and the new sample contribute equally.
#[derive(Debug, Clone)]
pub struct EventBasedEma {
    half_life: Duration,
    value: f64,
    sample_variance: f64,
    estimator_variance: f64,
    last_observation: Option<Instant>,
    samples: u64,
}

impl EventBasedEma {
    pub fn new(half_life: Duration) -> Self {
        Self {
            half_life,
            value: 0.0,
            sample_variance: 0.0,
            estimator_variance: 1.0,
            last_observation: None,
            samples: 0,
        }
    }

    pub fn add_sample(&mut self, now: Instant, sample: f64) {
        match self.last_observation {
            None => {
                self.value = sample;
            }
            Some(last) => {
                let age = now.saturating_duration_since(last).as_secs_f64();
                let alpha = 0.5_f64.powf(age / self.half_life.as_secs_f64());
                let diff = sample - self.value;

                self.value = alpha * self.value + (1.0 - alpha) * sample;
                self.sample_variance = if self.samples == 1 {
                    diff * diff
                } else {
                    alpha * self.sample_variance + (1.0 - alpha) * diff * diff
                };
                self.estimator_variance =
                    alpha * alpha * self.estimator_variance + (1.0 - alpha) * (1.0 - alpha);
            }
        }

        self.last_observation = Some(now);
        self.samples += 1;
    }

    pub fn average(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.value)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Half-width of the 95% confidence interval around [`average`].
    ///
    /// [`average`]: EventBasedEma::average
    pub fn confidence_interval(&self) -> f64 {
        1.96 * (self.sample_variance * self.estimator_variance).sqrt()
    }

    /// Whether the estimate has settled: at least two samples and a
    /// confidence interval within 10% of the mean.
    pub fn converged(&self) -> bool {
        self.samples >= 2 && self.confidence_interval() <= 0.1 * self.value.abs()
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.sample_variance = 0.0;
        self.estimator_variance = 1.0;
        self.last_observation = None;
        self.samples = 0;
    }
}
