use crate::greedy::{DistSampler, GreedySampler};
use crate::repetition::RepetitionPenaltySampler;
use crate::temperature::TemperatureSampler;
use crate::top_k::TopKSampler;
use crate::top_p::TopPSampler;

/// A candidate token and its (possibly transformed) logit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenLogit {
    pub token_id: u32,
    pub logit: f32,
}

/// One step of a sampling chain.
pub trait Sampler: Send + Sync {
    fn name(&self) -> &str;

    /// Transform or filter `candidates` in place. `history` is the full
    /// token sequence so far, oldest first.
    fn apply(&self, candidates: &mut Vec<TokenLogit>, history: &[u32]);
}

/// Sort candidates by descending logit; NaN sorts last.
pub(crate) fn sort_descending(candidates: &mut [TokenLogit]) {
    candidates.sort_by(|a, b| match (a.logit.is_nan(), b.logit.is_nan()) {
        (false, false) => b.logit.total_cmp(&a.logit),
        (a_nan, b_nan) => a_nan.cmp(&b_nan),
    });
}

/// Softmax over the candidates' logits, in candidate order.
pub(crate) fn probabilities(candidates: &[TokenLogit]) -> Vec<f32> {
    let max = candidates
        .iter()
        .map(|t| t.logit)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = candidates.iter().map(|t| (t.logit - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Runs samplers in order; the last one should be a selector.
#[derive(Default)]
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }

    /// Build the conventional chain for `params`: repetition penalty,
    /// temperature, top-k, top-p, then a seeded draw. A temperature of zero
    /// or below collapses to greedy selection.
    pub fn from_params(params: &SamplingParams) -> Self {
        let mut chain = SamplerChain::new();
        if params.repetition_penalty != 1.0 && params.repetition_window > 0 {
            chain = chain.with(Box::new(RepetitionPenaltySampler::new(
                params.repetition_penalty,
                params.repetition_window,
            )));
        }
        if params.temperature <= 0.0 {
            return chain.with(Box::new(GreedySampler::new()));
        }
        chain = chain.with(Box::new(TemperatureSampler::new(params.temperature)));
        if params.top_k > 0 {
            chain = chain.with(Box::new(TopKSampler::new(params.top_k)));
        }
        if params.top_p < 1.0 {
            chain = chain.with(Box::new(TopPSampler::new(params.top_p)));
        }
        chain.with(Box::new(DistSampler::new(params.seed)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// Select a token from raw logits indexed by token id. Empty logits
    /// select token 0.
    pub fn sample(&self, logits: &[f32], history: &[u32]) -> u32 {
        let mut candidates: Vec<TokenLogit> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();

        for sampler in &self.samplers {
            sampler.apply(&mut candidates, history);
        }

        candidates.first().map(|t| t.token_id).unwrap_or(0)
    }
}

/// Knobs for `SamplerChain::from_params`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    /// 0 disables top-k.
    pub top_k: usize,
    /// 1.0 disables top-p.
    pub top_p: f32,
    /// 1.0 disables the penalty.
    pub repetition_penalty: f32,
    pub repetition_window: usize,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repetition_penalty: 1.0,
            repetition_window: 64,
            seed: 0,
        }
    }
}
