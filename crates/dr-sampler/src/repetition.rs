use crate::sampler::{Sampler, TokenLogit};

/// Penalizes tokens that appear in the last `window` entries of the
/// history: positive logits are divided by `penalty`, negative ones
/// multiplied.
#[derive(Debug, Clone)]
pub struct RepetitionPenaltySampler {
    penalty: f32,
    window: usize,
}

impl RepetitionPenaltySampler {
    pub fn new(penalty: f32, window: usize) -> Self {
        Self { penalty, window }
    }
}

impl Sampler for RepetitionPenaltySampler {
    fn name(&self) -> &str {
        "repetition_penalty"
    }

    fn apply(&self, candidates: &mut Vec<TokenLogit>, history: &[u32]) {
        let recent = &history[history.len().saturating_sub(self.window)..];
        for c in candidates.iter_mut() {
            if recent.contains(&c.token_id) {
                if c.logit > 0.0 {
                    c.logit /= self.penalty;
                } else {
                    c.logit *= self.penalty;
                }
            }
        }
    }
}
