use std::os::raw::{c_char, c_void};

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DRStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorModelLoad = 2,
    ErrorGenerate = 3,
    ErrorNotLoaded = 4,
    ErrorInternal = 5,
}

/// Why a generation ended.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DRFinishReason {
    Stop = 0,
    Length = 1,
    Cancelled = 2,
}

/// Parameters controlling one generation.
///
/// With `n_stop_tokens == 0` the tokenizer's end-of-sequence token stops
/// generation.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DRGenerateParams {
    pub max_new_tokens: u32,
    pub stop_tokens: *const u32,
    pub n_stop_tokens: usize,
}

impl Default for DRGenerateParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            stop_tokens: std::ptr::null(),
            n_stop_tokens: 0,
        }
    }
}

/// Token selection. `greedy` ignores every other field.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DRSamplingParams {
    pub greedy: bool,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub repetition_window: u32,
    pub seed: u64,
}

impl Default for DRSamplingParams {
    fn default() -> Self {
        Self {
            greedy: true,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repetition_penalty: 1.0,
            repetition_window: 64,
            seed: 0,
        }
    }
}

/// Latency summary of a finished generation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DRGenerateStats {
    pub n_tokens: u32,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    /// Negative when no step processed the prompt.
    pub prompt_ms: f64,
    pub tokens_per_sec: f64,
    pub finish_reason: DRFinishReason,
}

/// Callback for streaming text output.
/// Returns true to continue generation, false to stop.
pub type DRStreamCallback =
    Option<extern "C" fn(text: *const c_char, user_data: *mut c_void) -> bool>;
