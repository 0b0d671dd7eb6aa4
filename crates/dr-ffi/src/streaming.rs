use std::ffi::CString;
use std::os::raw::c_void;

use crate::types::DRStreamCallback;

/// Convert generated text to a C string.
///
/// C strings cannot hold NUL, so text is cut at the first NUL byte. Both
/// `dr_generate` and `dr_generate_streaming` deliver text through this.
pub fn c_text(text: &str) -> CString {
    let end = text.find('\0').unwrap_or(text.len());
    CString::new(&text[..end]).unwrap_or_default()
}

/// Invoke a streaming callback with a chunk of text.
///
/// Returns `true` if generation should continue, `false` to stop.
/// If there is no callback, returns `true` (continue).
pub fn invoke_callback(callback: DRStreamCallback, user_data: *mut c_void, text: &str) -> bool {
    match callback {
        Some(cb) => {
            let c_str = c_text(text);
            cb(c_str.as_ptr(), user_data)
        }
        None => true,
    }
}
