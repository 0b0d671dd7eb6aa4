mod context;
mod error;
mod streaming;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;

use dr_model::Tokenizer;
use dr_pipeline::{ArtifactNames, FinishReason, Generation, Selection};
use dr_sampler::{SamplerChain, SamplingParams};

/// Execute a closure that returns a `DRStatus`, catching any panics
/// and converting them into `DRStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> DRStatus>(f: F) -> DRStatus {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            DRStatus::ErrorInternal
        }
    }
}

/// Borrow a required C string argument.
unsafe fn str_arg<'a>(p: *const c_char, what: &str) -> Result<&'a str, DRStatus> {
    if p.is_null() {
        set_last_error(format!("{} is null", what));
        return Err(DRStatus::ErrorInvalidArgument);
    }
    CStr::from_ptr(p).to_str().map_err(|e| {
        set_last_error(format!("invalid {}: {}", what, e));
        DRStatus::ErrorInvalidArgument
    })
}

/// Borrow an optional C string argument; null yields `default`.
unsafe fn str_or<'a>(
    p: *const c_char,
    what: &str,
    default: &'a str,
) -> Result<&'a str, DRStatus> {
    if p.is_null() {
        Ok(default)
    } else {
        str_arg(p, what)
    }
}

unsafe fn artifact_args<'a>(
    model_dir: *const c_char,
    prefix: *const c_char,
    main_network: *const c_char,
    cache_processor: *const c_char,
    logit_processor: *const c_char,
) -> Result<(&'a str, &'a str, ArtifactNames), DRStatus> {
    let defaults = ArtifactNames::default();
    let name = |p: *const c_char, what: &str, default: &str| -> Result<String, DRStatus> {
        Ok(str_or(p, what, default)?.to_string())
    };
    Ok((
        str_arg(model_dir, "model_dir")?,
        str_or(prefix, "prefix", "")?,
        ArtifactNames {
            main_network: name(main_network, "main_network", &defaults.main_network)?,
            cache_processor: name(cache_processor, "cache_processor", &defaults.cache_processor)?,
            logit_processor: name(logit_processor, "logit_processor", &defaults.logit_processor)?,
        },
    ))
}

/// Create a context over the three stage artifacts
/// `<model_dir>/<prefix><name>.gguf`.
///
/// Null `prefix` means no prefix; a null stage name uses the default
/// (`main`, `cache`, `logits`). Nothing is loaded until `dr_load` or the
/// first generation. On success writes the context into `*ctx_out`; free it
/// with `dr_context_destroy`.
#[no_mangle]
pub unsafe extern "C" fn dr_context_create(
    model_dir: *const c_char,
    prefix: *const c_char,
    main_network: *const c_char,
    cache_processor: *const c_char,
    logit_processor: *const c_char,
    ctx_out: *mut *mut DRContext,
) -> DRStatus {
    catch_panic(|| {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        }
        let args = unsafe {
            artifact_args(model_dir, prefix, main_network, cache_processor, logit_processor)
        };
        let (dir, prefix, artifacts) = match args {
            Ok(a) => a,
            Err(status) => return status,
        };

        match DRContext::open(Path::new(dir), prefix, &artifacts) {
            Ok(ctx) => {
                unsafe { *ctx_out = Box::into_raw(Box::new(ctx)) };
                DRStatus::Ok
            }
            Err(e) => fail(e),
        }
    })
}

/// Destroy a context previously created by `dr_context_create`.
///
/// Passing a null pointer is a no-op and returns `DRStatus::Ok`.
#[no_mangle]
pub unsafe extern "C" fn dr_context_destroy(ctx: *mut DRContext) -> DRStatus {
    if ctx.is_null() {
        return DRStatus::Ok;
    }
    catch_panic(|| {
        drop(unsafe { Box::from_raw(ctx) });
        DRStatus::Ok
    })
}

/// Load all three stages. Loading twice is a no-op.
#[no_mangle]
pub unsafe extern "C" fn dr_load(ctx: *mut DRContext) -> DRStatus {
    catch_panic(|| {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            set_last_error("ctx is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        };
        match ctx.runtime.block_on(ctx.pipeline().load()) {
            Ok(()) => DRStatus::Ok,
            Err(e) => fail(e),
        }
    })
}

/// Release all three stages. A later generation loads them again.
#[no_mangle]
pub unsafe extern "C" fn dr_unload(ctx: *mut DRContext) -> DRStatus {
    catch_panic(|| {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            set_last_error("ctx is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        };
        match ctx.runtime.block_on(ctx.pipeline().unload()) {
            Ok(()) => DRStatus::Ok,
            Err(e) => fail(e),
        }
    })
}

/// Tokenize `text`.
///
/// On success writes a heap-allocated array into `*tokens_out` and its
/// length into `*len_out`. Free it with `dr_free_tokens`.
#[no_mangle]
pub unsafe extern "C" fn dr_encode(
    ctx: *mut DRContext,
    text: *const c_char,
    tokens_out: *mut *mut u32,
    len_out: *mut usize,
) -> DRStatus {
    catch_panic(|| {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            set_last_error("ctx is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        };
        if tokens_out.is_null() || len_out.is_null() {
            set_last_error("null output argument".to_string());
            return DRStatus::ErrorInvalidArgument;
        }
        let text = match unsafe { str_arg(text, "text") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let tokens = match ctx.tokenizer.encode(text) {
            Ok(t) => t,
            Err(e) => {
                set_last_error(format!("tokenization failed: {}", e));
                return DRStatus::ErrorInvalidArgument;
            }
        };
        let boxed = tokens.into_boxed_slice();
        unsafe {
            *len_out = boxed.len();
            *tokens_out = Box::into_raw(boxed) as *mut u32;
        }
        DRStatus::Ok
    })
}

/// Free an array returned by `dr_encode`.
#[no_mangle]
pub unsafe extern "C" fn dr_free_tokens(tokens: *mut u32, len: usize) {
    if !tokens.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(tokens, len)));
    }
}

/// Prompt tokens and stop set for one request.
unsafe fn request(
    ctx: &DRContext,
    prompt: *const c_char,
    params: &DRGenerateParams,
) -> Result<(Vec<u32>, Vec<u32>), DRStatus> {
    let prompt = str_arg(prompt, "prompt")?;
    let tokens = ctx.tokenizer.encode(prompt).map_err(|e| {
        set_last_error(format!("tokenization failed: {}", e));
        DRStatus::ErrorInvalidArgument
    })?;
    let given = if params.stop_tokens.is_null() || params.n_stop_tokens == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(params.stop_tokens, params.n_stop_tokens)
    };
    Ok((tokens, ctx.stop_tokens(given)))
}

fn stats_of(generation: &Generation) -> DRGenerateStats {
    DRGenerateStats {
        n_tokens: generation.tokens.len() as u32,
        mean_ms: generation.stats.mean_ms,
        std_dev_ms: generation.stats.std_dev_ms,
        prompt_ms: generation.stats.prompt_ms.unwrap_or(-1.0),
        tokens_per_sec: generation.stats.tokens_per_sec,
        finish_reason: match generation.finish_reason {
            FinishReason::Stop => DRFinishReason::Stop,
            FinishReason::Length => DRFinishReason::Length,
            FinishReason::Cancelled => DRFinishReason::Cancelled,
        },
    }
}

/// Generate text from a prompt (non-streaming).
///
/// On success, writes a heap-allocated C string into `*output` and, when
/// `stats_out` is not null, the latency summary into `*stats_out`. The
/// caller must later call `dr_free_string` to free the output string. On
/// failure nothing is written to `*output`. Text is cut at the first NUL
/// byte, exactly as `dr_generate_streaming` cuts each chunk.
#[no_mangle]
pub unsafe extern "C" fn dr_generate(
    ctx: *mut DRContext,
    prompt: *const c_char,
    params: DRGenerateParams,
    output: *mut *mut c_char,
    stats_out: *mut DRGenerateStats,
) -> DRStatus {
    catch_panic(|| {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            set_last_error("ctx is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        };
        if output.is_null() {
            set_last_error("output is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        }
        let (tokens, stops) = match unsafe { request(ctx, prompt, &params) } {
            Ok(r) => r,
            Err(status) => return status,
        };

        let generation = match ctx.runtime.block_on(ctx.generator.generate_text(
            &tokens,
            params.max_new_tokens as usize,
            &stops,
        )) {
            Ok(g) => g,
            Err(e) => return fail(e),
        };
        let stats = stats_of(&generation);
        unsafe {
            *output = streaming::c_text(&generation.text).into_raw();
            if let Some(out) = stats_out.as_mut() {
                *out = stats;
            }
        }
        DRStatus::Ok
    })
}

/// Generate text from a prompt with streaming output.
///
/// Each new piece of text is passed to `callback` as a C string. The
/// callback returns `true` to continue or `false` to stop; stopping early
/// still returns `DRStatus::Ok`. A failure after some text was delivered
/// returns an error status, and the delivered text remains valid. A chunk
/// holding a NUL byte is cut at it, matching `dr_generate`.
#[no_mangle]
pub unsafe extern "C" fn dr_generate_streaming(
    ctx: *mut DRContext,
    prompt: *const c_char,
    params: DRGenerateParams,
    callback: DRStreamCallback,
    user_data: *mut c_void,
) -> DRStatus {
    catch_panic(|| {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            set_last_error("ctx is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        };
        let (tokens, stops) = match unsafe { request(ctx, prompt, &params) } {
            Ok(r) => r,
            Err(status) => return status,
        };

        ctx.runtime.block_on(async {
            let mut stream = match ctx
                .generator
                .stream_text(&tokens, params.max_new_tokens as usize, &stops)
                .await
            {
                Ok(s) => s,
                Err(e) => return fail(e),
            };
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(text) => {
                        if !streaming::invoke_callback(callback, user_data, &text) {
                            stream.cancel_handle().cancel();
                            break;
                        }
                    }
                    Err(e) => return fail(e),
                }
            }
            DRStatus::Ok
        })
    })
}

/// Choose how tokens are selected for later generations.
///
/// `greedy` (the default) uses the logit processor stage; otherwise a
/// sampling chain built from the remaining fields is used.
#[no_mangle]
pub unsafe extern "C" fn dr_set_sampling(
    ctx: *mut DRContext,
    params: DRSamplingParams,
) -> DRStatus {
    catch_panic(|| {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            set_last_error("ctx is null".to_string());
            return DRStatus::ErrorInvalidArgument;
        };
        let selection = if params.greedy {
            Selection::Greedy
        } else {
            let chain = SamplerChain::from_params(&SamplingParams {
                temperature: params.temperature,
                top_k: params.top_k as usize,
                top_p: params.top_p,
                repetition_penalty: params.repetition_penalty,
                repetition_window: params.repetition_window as usize,
                seed: params.seed,
            });
            Selection::Sampled(Arc::new(chain))
        };
        ctx.pipeline().set_selection(selection);
        DRStatus::Ok
    })
}

/// Install a `tracing` subscriber writing to stderr.
///
/// `filter` uses `EnvFilter` syntax (for example `"dr_pipeline=debug"`);
/// null falls back to `RUST_LOG`, then `info`. Only the first call in a
/// process takes effect.
#[no_mangle]
pub unsafe extern "C" fn dr_init_logging(filter: *const c_char) -> DRStatus {
    catch_panic(|| {
        let filter = match unsafe { str_or(filter, "filter", "") } {
            Ok(f) => f,
            Err(status) => return status,
        };
        let env_filter = if filter.is_empty() {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into())
        } else {
            match tracing_subscriber::EnvFilter::try_new(filter) {
                Ok(f) => f,
                Err(e) => {
                    set_last_error(format!("invalid filter: {}", e));
                    return DRStatus::ErrorInvalidArgument;
                }
            }
        };
        // A subscriber installed earlier (by us or the host) wins.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
        DRStatus::Ok
    })
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error on this
/// thread, or null if there is none. The caller must free the returned
/// string with `dr_free_string`.
#[no_mangle]
pub extern "C" fn dr_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `dr_generate` or `dr_last_error`.
#[no_mangle]
pub unsafe extern "C" fn dr_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
