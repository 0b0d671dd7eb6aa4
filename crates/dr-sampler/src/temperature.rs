use crate::sampler::{Sampler, TokenLogit};

/// Divides every logit by the temperature. Values at or below zero are
/// clamped to a tiny positive temperature.
#[derive(Debug, Clone)]
pub struct TemperatureSampler {
    temperature: f32,
}

impl TemperatureSampler {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature: temperature.max(1e-7),
        }
    }
}

impl Sampler for TemperatureSampler {
    fn name(&self) -> &str {
        "temperature"
    }

    fn apply(&self, candidates: &mut Vec<TokenLogit>, _history: &[u32]) {
        for c in candidates.iter_mut() {
            c.logit /= self.temperature;
        }
    }
}
