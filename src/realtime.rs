use crate::models::{RealtimeMetric, RealtimeSnapshot};
use chrono::Utc;
use rand::Rng;

/// Source of the synthetic live-widget numbers. Only the response shape is
/// contractual; implementations decide where values come from.
pub trait RealtimeGenerator: Send + Sync {
    fn snapshot(&self) -> RealtimeSnapshot;
}

#[derive(Debug, Clone, Copy)]
struct MetricBand {
    name: &'static str,
    color: &'static str,
    base: f64,
    spread: f64,
    /// Center of the change distribution, as a fraction of `change_spread`.
    change_bias: f64,
    change_spread: f64,
    integral: bool,
}

const BANDS: [MetricBand; 4] = [
    MetricBand {
        name: "Active Users",
        color: "#3B82F6",
        base: 15_000.0,
        spread: 5_000.0,
        change_bias: 0.5,
        change_spread: 10.0,
        integral: true,
    },
    MetricBand {
        name: "Revenue",
        color: "#10B981",
        base: 200_000.0,
        spread: 50_000.0,
        change_bias: 0.3,
        change_spread: 15.0,
        integral: true,
    },
    MetricBand {
        name: "Conversion Rate",
        color: "#8B5CF6",
        base: 2.5,
        spread: 5.0,
        change_bias: 0.5,
        change_spread: 2.0,
        integral: false,
    },
    MetricBand {
        name: "Bounce Rate",
        color: "#EF4444",
        base: 25.0,
        spread: 20.0,
        change_bias: 0.7,
        change_spread: 5.0,
        integral: false,
    },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRealtimeGenerator;

impl RandomRealtimeGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl RealtimeGenerator for RandomRealtimeGenerator {
    fn snapshot(&self) -> RealtimeSnapshot {
        let mut rng = rand::rng();
        let metrics = BANDS
            .iter()
            .map(|band| {
                let raw = band.base + rng.random::<f64>() * band.spread;
                let value = if band.integral { raw.floor() } else { raw };
                RealtimeMetric {
                    name: band.name.to_string(),
                    value,
                    change: (rng.random::<f64>() - band.change_bias) * band.change_spread,
                    color: band.color.to_string(),
                }
            })
            .collect();

        RealtimeSnapshot {
            timestamp: Utc::now(),
            metrics,
        }
    }
}

/// Replays a fixed set of metrics with a fresh timestamp.
#[derive(Debug, Clone)]
pub struct FixedRealtimeGenerator {
    metrics: Vec<RealtimeMetric>,
}

impl FixedRealtimeGenerator {
    pub fn new(metrics: Vec<RealtimeMetric>) -> Self {
        Self { metrics }
    }
}

impl RealtimeGenerator for FixedRealtimeGenerator {
    fn snapshot(&self) -> RealtimeSnapshot {
        RealtimeSnapshot {
            timestamp: Utc::now(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RandomRealtimeGenerator, RealtimeGenerator, BANDS};

    #[test]
    fn random_snapshot_stays_within_bands() {
        let generator = RandomRealtimeGenerator::new();
        for _ in 0..200 {
            let snapshot = generator.snapshot();
            assert_eq!(snapshot.metrics.len(), BANDS.len());
            for (metric, band) in snapshot.metrics.iter().zip(BANDS.iter()) {
                assert_eq!(metric.name, band.name);
                assert_eq!(metric.color, band.color);
                assert!(metric.value >= band.base && metric.value <= band.base + band.spread);
                let low = -band.change_bias * band.change_spread;
                let high = (1.0 - band.change_bias) * band.change_spread;
                assert!(metric.change >= low - 1e-9 && metric.change <= high + 1e-9);
            }
        }
    }

    #[test]
    fn integral_bands_have_no_fraction() {
        let snapshot = RandomRealtimeGenerator::new().snapshot();
        let active = &snapshot.metrics[0];
        assert_eq!(active.value.fract(), 0.0);
    }
}
