//! Sentence batching for speech synthesis
//!
//! Model output arrives a few tokens at a time; the TTS service sounds far
//! better voicing whole sentences.

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Accumulates streamed text and releases complete sentences
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: String,
}

impl SentenceBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Add a fragment; returns everything up to the last sentence terminator
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buf.push_str(fragment);

        let end = self.buf.rfind(TERMINATORS)? + 1;
        let rest = self.buf.split_off(end);
        let ready = std::mem::replace(&mut self.buf, rest.trim_start().to_string());

        let sentence = ready.trim();
        (!sentence.is_empty()).then(|| sentence.to_string())
    }

    /// Take whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
