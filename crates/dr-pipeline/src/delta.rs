/// Turns successive decodes of the generated tokens into append-only text
/// chunks.
///
/// A decode ending in U+FFFD is usually a multi-byte character split across
/// tokens, so it is held back until a later token completes it or
/// `finish` is called.
#[derive(Debug, Default, Clone)]
pub struct TextDelta {
    decoded: String,
    emitted: usize,
}

impl TextDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// `decoded` is the full text of every generated token so far. Returns
    /// whatever has not been emitted yet.
    pub fn push(&mut self, decoded: String) -> Option<String> {
        let complete = !decoded.ends_with(char::REPLACEMENT_CHARACTER);
        self.decoded = decoded;
        if complete {
            self.flush()
        } else {
            None
        }
    }

    /// Emit anything still held back.
    pub fn finish(&mut self) -> Option<String> {
        self.flush()
    }

    fn flush(&mut self) -> Option<String> {
        // Emitted text is never revised, even if a later decode rewrites it.
        let mut start = self.emitted.min(self.decoded.len());
        while !self.decoded.is_char_boundary(start) {
            start += 1;
        }
        if start >= self.decoded.len() {
            return None;
        }
        let chunk = self.decoded[start..].to_string();
        self.emitted = self.decoded.len();
        Some(chunk)
    }
}
