use crate::sampler::{sort_descending, Sampler, TokenLogit};

/// Keeps the `k` highest-logit candidates, sorted descending. `k == 0`
/// keeps everything.
#[derive(Debug, Clone)]
pub struct TopKSampler {
    k: usize,
}

impl TopKSampler {
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl Sampler for TopKSampler {
    fn name(&self) -> &str {
        "top_k"
    }

    fn apply(&self, candidates: &mut Vec<TokenLogit>, _history: &[u32]) {
        if self.k == 0 || self.k >= candidates.len() {
            return;
        }
        sort_descending(candidates);
        candidates.truncate(self.k);
    }
}
