//! Incremental classification of `<thought>`/`<answer>` tagged streams.

use super::floor_char_boundary;

/// Which delimiter pair a span of content belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Reasoning content, logged but never spoken.
    Thought,
    /// Answer content, routed to speech synthesis.
    Answer,
}

/// One classified span of response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChunk {
    pub kind: ChunkKind,
    pub content: String,
}

impl ClassifiedChunk {
    fn new(kind: ChunkKind, content: &str) -> Self {
        Self {
            kind,
            content: content.to_owned(),
        }
    }
}

/// Parser position relative to the delimiter tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Outside any tagged span, scanning for an open delimiter.
    Searching,
    /// Inside `<thought>...</thought>`.
    InThought,
    /// Inside `<answer>...</answer>`.
    InAnswer,
}

/// One applicable state transition: how many buffer bytes to consume,
/// what (if anything) to emit, and the state to move to.
struct Transition {
    next: ParserState,
    consume: usize,
    emit: Option<ClassifiedChunk>,
    entered_tag: bool,
}

const THOUGHT_OPEN: &str = "<thought>";
const THOUGHT_CLOSE: &str = "</thought>";
const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

/// Incremental tag-stream parser.
///
/// Fragments of any size are appended to an internal buffer; spans are
/// emitted as soon as they are known not to contain a partial delimiter.
/// Inside a tag, everything but the trailing window of
/// `close.len() - 1` bytes can be released immediately: a close delimiter
/// split across two fragments always leaves its head inside that window,
/// so it is never emitted as content and never missed.
#[derive(Debug)]
pub struct TagStreamParser {
    state: ParserState,
    buffer: String,
    saw_tag: bool,
}

impl Default for TagStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TagStreamParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Searching,
            buffer: String::new(),
            saw_tag: false,
        }
    }

    /// Feed one fragment; returns the chunks that became safe to emit.
    pub fn ingest(&mut self, fragment: &str) -> Vec<ClassifiedChunk> {
        if fragment.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(fragment);

        let mut emitted = Vec::new();
        while let Some(transition) = step(self.state, &self.buffer) {
            self.buffer.drain(..transition.consume);
            self.state = transition.next;
            if transition.entered_tag {
                self.saw_tag = true;
            }
            if let Some(chunk) = transition.emit {
                emitted.push(chunk);
            }
        }
        emitted
    }

    /// Flush the remaining buffer once the source stream has ended.
    ///
    /// A stream that never produced a delimiter flushes as one `Answer`
    /// chunk so the user is not left silent; a stream that ended inside a
    /// tag flushes the remainder under that tag's kind; residue outside
    /// tags is dropped.
    pub fn flush(&mut self) -> Vec<ClassifiedChunk> {
        let buffer = std::mem::take(&mut self.buffer);
        let state = self.state;
        self.state = ParserState::Searching;

        if buffer.is_empty() {
            return Vec::new();
        }
        let kind = match state {
            ParserState::Searching if !self.saw_tag => ChunkKind::Answer,
            ParserState::Searching => return Vec::new(),
            ParserState::InThought => ChunkKind::Thought,
            ParserState::InAnswer => ChunkKind::Answer,
        };
        vec![ClassifiedChunk { kind, content: buffer }]
    }
}

/// Pure transition function: the next applicable step for `(state, buffer)`,
/// or `None` when no progress can be made without more data.
fn step(state: ParserState, buffer: &str) -> Option<Transition> {
    match state {
        ParserState::Searching => {
            let thought = buffer.find(THOUGHT_OPEN);
            let answer = buffer.find(ANSWER_OPEN);
            let (pos, open_len, next) = match (thought, answer) {
                // Reasoning wins when it occurs no later than the answer tag.
                (Some(t), Some(a)) if t <= a => (t, THOUGHT_OPEN.len(), ParserState::InThought),
                (Some(t), None) => (t, THOUGHT_OPEN.len(), ParserState::InThought),
                (_, Some(a)) => (a, ANSWER_OPEN.len(), ParserState::InAnswer),
                (None, None) => return None,
            };
            Some(Transition {
                next,
                consume: pos + open_len,
                emit: None,
                entered_tag: true,
            })
        }
        ParserState::InThought => step_in_tag(state, buffer, THOUGHT_CLOSE, ChunkKind::Thought),
        ParserState::InAnswer => step_in_tag(state, buffer, ANSWER_CLOSE, ChunkKind::Answer),
    }
}

fn step_in_tag(
    state: ParserState,
    buffer: &str,
    close: &str,
    kind: ChunkKind,
) -> Option<Transition> {
    if let Some(end) = buffer.find(close) {
        return Some(Transition {
            next: ParserState::Searching,
            consume: end + close.len(),
            emit: (end > 0).then(|| ClassifiedChunk::new(kind, &buffer[..end])),
            entered_tag: false,
        });
    }
    // No close yet: release all but the window that could hold a split
    // close delimiter.
    let keep = close.len().saturating_sub(1);
    let emit_len = floor_char_boundary(buffer, buffer.len().saturating_sub(keep));
    if emit_len == 0 {
        return None;
    }
    Some(Transition {
        next: state,
        consume: emit_len,
        emit: Some(ClassifiedChunk::new(kind, &buffer[..emit_len])),
        entered_tag: false,
    })
}
