//! Extraction of the structured `[CMD]...[/CMD]` command block.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::floor_char_boundary;

const CMD_OPEN: &str = "[CMD]";
const CMD_CLOSE: &str = "[/CMD]";

static BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[CMD\](.*?)\[/CMD\]").expect("valid regex"));

/// Matches an unquoted object key after `{` or `,` so it can be quoted.
static UNQUOTED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("valid regex")
});

/// One side-effect request decoded from a command block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Split the assembled response into speakable text and an optional command.
///
/// The first `[CMD]...[/CMD]` block is decoded; every block (decoded or not)
/// is stripped from the speakable text. Models reliably produce
/// close-but-invalid JSON, so the inner text goes through a best-effort
/// repair (single quotes to double quotes, quoting of bare keys) before the
/// strict decode. A block that still fails to decode is logged and dropped,
/// never an error.
pub fn extract_command(full_text: &str) -> (String, Option<CommandEnvelope>) {
    let Some(captures) = BLOCK.captures(full_text) else {
        return (full_text.to_owned(), None);
    };

    let inner = &captures[1];
    let repaired = repair_json(inner);
    let command = match serde_json::from_str::<CommandEnvelope>(&repaired) {
        Ok(command) => Some(command),
        Err(e) => {
            tracing::warn!("undecodable command block {inner:?}: {e}");
            None
        }
    };

    let speakable = BLOCK.replace_all(full_text, "").trim().to_owned();
    (speakable, command)
}

/// Repair the common JSON mistakes models make inside command blocks.
///
/// Known best-effort heuristic: the key-quoting pattern can mis-repair
/// legitimate string values containing `{key:` shapes. Good enough for the
/// formatting mistakes actually observed; the strict decode catches the
/// rest.
fn repair_json(inner: &str) -> String {
    let double_quoted = inner.replace('\'', "\"");
    UNQUOTED_KEY
        .replace_all(&double_quoted, "$1\"$2\":")
        .into_owned()
}

/// Incremental filter keeping command blocks out of the spoken stream.
///
/// Answer text streams to the synthesizer before the full response exists,
/// so the block markers have to be honored on the fly: text outside a block
/// passes through (minus a tail window that could still be the start of an
/// open marker), text inside a block is withheld. A block left unterminated
/// at end-of-stream is not a well-formed block, so `flush` releases it
/// verbatim, matching what [`extract_command`] would have kept.
#[derive(Debug, Default)]
pub struct CommandBlockFilter {
    buffer: String,
    in_block: bool,
}

impl CommandBlockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed answer text; returns the part that is safe to speak.
    pub fn push(&mut self, text: &str) -> String {
        self.buffer.push_str(text);
        let mut speakable = String::new();
        loop {
            if self.in_block {
                // The buffer starts at the open marker; everything up to the
                // close marker is withheld.
                match self.buffer[CMD_OPEN.len()..].find(CMD_CLOSE) {
                    Some(at) => {
                        let end = CMD_OPEN.len() + at + CMD_CLOSE.len();
                        self.buffer.drain(..end);
                        self.in_block = false;
                    }
                    None => return speakable,
                }
            } else {
                match self.buffer.find(CMD_OPEN) {
                    Some(at) => {
                        speakable.push_str(&self.buffer[..at]);
                        self.buffer.drain(..at);
                        self.in_block = true;
                    }
                    None => {
                        // Hold back a tail that could be a split open marker.
                        let keep = CMD_OPEN.len() - 1;
                        let release = floor_char_boundary(
                            &self.buffer,
                            self.buffer.len().saturating_sub(keep),
                        );
                        speakable.push_str(&self.buffer[..release]);
                        self.buffer.drain(..release);
                        return speakable;
                    }
                }
            }
        }
    }

    /// Release whatever is still held once the answer stream has ended.
    pub fn flush(&mut self) -> String {
        self.in_block = false;
        std::mem::take(&mut self.buffer)
    }
}
