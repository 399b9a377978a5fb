use std::time::Duration;

/// Weight given to the newest sample.
const ALPHA: f64 = 0.5;

/// Exponentially weighted moving average over a peer's observed response
/// latencies. Seeded from the first sample, then each new observation pulls
/// the estimate halfway towards it, so the gauge tracks recent behaviour
/// without being whipped around by a single outlier.
#[derive(Debug, Clone)]
pub struct RttEstimate {
    smoothed: Duration,
    samples: u64,
}

impl RttEstimate {
    pub fn new(sample: Duration) -> RttEstimate {
        RttEstimate { smoothed: sample, samples: 1 }
    }

    /// Folds a new latency observation into the estimate.
    pub fn add_sample(&mut self, sample: Duration) {
        let mixed = self.smoothed.as_secs_f64() * (1.0 - ALPHA) + sample.as_secs_f64() * ALPHA;
        self.smoothed = Duration::from_secs_f64(mixed);
        self.samples += 1;
    }

    pub fn current(&self) -> Duration {
        self.smoothed
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_first_sample_seeds_the_estimate() {
        let rtt = RttEstimate::new(Duration::from_millis(80));
        assert_eq!(rtt.current(), Duration::from_millis(80));
        assert_eq!(rtt.samples(), 1);
    }

    #[actix_rt::test]
    async fn test_estimate_moves_towards_new_samples() {
        let mut rtt = RttEstimate::new(Duration::from_millis(100));
        rtt.add_sample(Duration::from_millis(200));
        assert_eq!(rtt.current(), Duration::from_millis(150));

        for _ in 0..8 {
            rtt.add_sample(Duration::from_millis(200));
        }
        assert!(rtt.current() > Duration::from_millis(190));
        assert!(rtt.current() <= Duration::from_millis(200));
        assert_eq!(rtt.samples(), 9);
    }
}
