use crate::sampler::{probabilities, sort_descending, Sampler, TokenLogit};

/// Nucleus filtering: keeps the smallest prefix of the sorted candidates
/// whose cumulative probability exceeds `p` (at least one).
#[derive(Debug, Clone)]
pub struct TopPSampler {
    p: f32,
}

impl TopPSampler {
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for TopPSampler {
    fn name(&self) -> &str {
        "top_p"
    }

    fn apply(&self, candidates: &mut Vec<TokenLogit>, _history: &[u32]) {
        if candidates.is_empty() {
            return;
        }
        sort_descending(candidates);
        let mut cumulative = 0.0f32;
        let mut keep = candidates.len();
        for (i, prob) in probabilities(candidates).into_iter().enumerate() {
            cumulative += prob;
            if cumulative > self.p {
                keep = i + 1;
                break;
            }
        }
        candidates.truncate(keep.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nucleus() {
        // Probabilities ~ [0.665, 0.245, 0.090].
        let mut c: Vec<TokenLogit> = [0.0, 2.0, 1.0]
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();
        TopPSampler::new(0.8).apply(&mut c, &[]);
        let ids: Vec<u32> = c.iter().map(|t| t.token_id).collect();
        assert_eq!(ids, vec![1, 2]);

        TopPSampler::new(0.0).apply(&mut c, &[]);
        assert_eq!(c.len(), 1);
    }
}
