use std::time::Duration;

use serde::Serialize;

use crate::stream::Prediction;

/// Summary of one generation's step latencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Predictions measured.
    pub count: usize,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub prompt_ms: Option<f64>,
    /// Steps per second of accumulated step latency.
    pub tokens_per_sec: f64,
}

/// Collects step latencies as predictions arrive.
#[derive(Debug, Clone, Default)]
pub struct LatencyRecorder {
    latencies_ms: Vec<f64>,
    prompt_ms: Option<f64>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, prediction: &Prediction) {
        self.latencies_ms.push(millis(prediction.latency));
        if let Some(p) = prediction.prompt_latency {
            self.prompt_ms.get_or_insert(millis(p));
        }
    }

    pub fn stats(&self) -> LatencyStats {
        let total_ms: f64 = self.latencies_ms.iter().sum();
        LatencyStats {
            count: self.latencies_ms.len(),
            mean_ms: mean(&self.latencies_ms),
            std_dev_ms: std_dev(&self.latencies_ms),
            prompt_ms: self.prompt_ms,
            tokens_per_sec: if total_ms > 0.0 {
                self.latencies_ms.len() as f64 / (total_ms / 1000.0)
            } else {
                0.0
            },
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn prediction(latency_ms: u64, prompt_ms: Option<u64>) -> Prediction {
        Prediction {
            new_token: 1,
            all_tokens: vec![0, 1],
            latency: Duration::from_millis(latency_ms),
            prompt_latency: prompt_ms.map(Duration::from_millis),
        }
    }

    #[test]
    fn test_mean_and_std_dev() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[3.0]), 0.0);
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&v), 5.0);
        assert_relative_eq!(std_dev(&v), 2.0);
    }

    #[test]
    fn test_recorder() {
        let mut r = LatencyRecorder::new();
        assert_eq!(r.stats(), LatencyStats::default());

        r.record(&prediction(30, Some(25)));
        r.record(&prediction(10, None));
        r.record(&prediction(20, None));
        let s = r.stats();
        assert_eq!(s.count, 3);
        assert_relative_eq!(s.mean_ms, 20.0, epsilon = 1e-9);
        assert_relative_eq!(s.prompt_ms.unwrap(), 25.0, epsilon = 1e-9);
        assert_relative_eq!(s.tokens_per_sec, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(LatencyStats::default()).unwrap();
        assert_eq!(json["count"], 0);
        assert!(json["prompt_ms"].is_null());
    }
}
