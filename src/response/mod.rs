//! Streaming interpretation of model responses.
//!
//! A response arrives as arbitrarily-sized token fragments. Three small
//! stages turn that stream into speech and side effects:
//! - [`tags::TagStreamParser`] classifies spans as reasoning or answer
//!   content using `<thought>`/`<answer>` delimiters, incrementally.
//! - [`segment::SentenceSegmenter`] cuts answer text into speakable units.
//! - [`command::extract_command`] recovers an embedded `[CMD]...[/CMD]`
//!   block from the assembled response, repairing common JSON mistakes.

pub mod command;
pub mod segment;
pub mod tags;

pub use command::{CommandBlockFilter, CommandEnvelope, extract_command};
pub use segment::{SentenceSegmenter, SentenceUnit};
pub use tags::{ChunkKind, ClassifiedChunk, TagStreamParser};

/// Largest index `<= i` that lands on a `char` boundary of `s`.
///
/// Fragment cuts are byte-counted and may fall inside a multi-byte
/// character; every slice below a windowing cut goes through here first.
pub(crate) fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::floor_char_boundary;

    #[test]
    fn floor_char_boundary_backs_off_inside_multibyte() {
        let s = "a\u{00e9}b"; // 'é' occupies bytes 1..3
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 0), 0);
    }
}
