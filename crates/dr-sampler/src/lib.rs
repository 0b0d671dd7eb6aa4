//! `dr-sampler` - Sampling strategies for the explicit, non-greedy token
//! selection mode.
//!
//! Samplers transform a candidate list in place; a `SamplerChain` runs them
//! in order and returns the first surviving candidate.

pub mod greedy;
pub mod repetition;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use greedy::{DistSampler, GreedySampler};
pub use repetition::RepetitionPenaltySampler;
pub use sampler::{Sampler, SamplerChain, SamplingParams, TokenLogit};
pub use temperature::TemperatureSampler;
pub use top_k::TopKSampler;
pub use top_p::TopPSampler;
