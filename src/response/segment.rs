//! Sentence-level buffering of answer text for streaming synthesis.

/// A complete, trimmed span of answer text ready for one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    pub text: String,
}

/// Accumulates answer fragments and releases them at sentence-like
/// boundaries.
///
/// Releasing at coarse granularity keeps time-to-first-audio low without
/// cutting words or clauses apart. Boundaries are sentence punctuation
/// (`.`, `!`, `?`, an ellipsis), a comma followed by whitespace, and
/// newlines; the comma rule trades a little extra segmentation for
/// earlier audio on long clauses.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return every sentence unit it completed.
    pub fn push(&mut self, text: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(text);
        let mut units = Vec::new();
        while let Some(end) = boundary_end(&self.buffer) {
            let piece = self.buffer[..end].trim().to_owned();
            self.buffer = self.buffer[end..].to_owned();
            if !piece.is_empty() {
                units.push(SentenceUnit { text: piece });
            }
        }
        units
    }

    /// Emit whatever trailing text is still held, once the answer stream
    /// has ended. Clears the buffer.
    pub fn drain(&mut self) -> Option<SentenceUnit> {
        let leftover = std::mem::take(&mut self.buffer);
        let trimmed = leftover.trim();
        (!trimmed.is_empty()).then(|| SentenceUnit {
            text: trimmed.to_owned(),
        })
    }
}

/// Byte index one past the first complete boundary in `text`, or `None`
/// when no boundary has fully arrived.
///
/// Sentence punctuation is consumed as a run, so `...` or `?!` counts as
/// one boundary instead of leaving stray marks to be spoken on their own.
/// A run still touching the end of the buffer may grow when the next
/// fragment arrives and does not count yet; likewise a trailing comma
/// waits for its following whitespace.
fn boundary_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => return Some(i + c.len_utf8()),
            '.' | '!' | '?' | '\u{2026}' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, d)) = chars.peek() {
                    if matches!(d, '.' | '!' | '?' | '\u{2026}') {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        return Some(end);
                    }
                }
                return None;
            }
            ',' => match chars.peek() {
                Some(&(j, d)) if d.is_whitespace() => return Some(j + d.len_utf8()),
                Some(_) => {}
                None => return None,
            },
            _ => {}
        }
    }
    None
}
