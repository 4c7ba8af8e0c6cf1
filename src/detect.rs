//! Lexical scanning shared by the structure detector and the template compiler.

use regex::Regex;
use std::sync::LazyLock;

pub const OPEN_TAG: &str = "<%";
pub const CLOSE_TAG: &str = "%>";

static RAW_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<%\s*raw\s*%>").unwrap());
static RAW_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<%\s*endraw\s*%>").unwrap());

/// A slice of template source, either verbatim or subject to tag processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk<'a> {
    /// Outside any raw block.
    Code { text: &'a str, offset: usize },
    /// Interior of a `<%raw%>...<%endraw%>` block.
    Raw { text: &'a str, offset: usize },
}

/// Split `text` into raw-block interiors and everything else.
///
/// The raw delimiters themselves are dropped. An unterminated raw block
/// runs to the end of the input.
pub fn split_raw_blocks(text: &str) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut pos = 0;

    while let Some(open) = RAW_OPEN_RE.find_at(text, pos) {
        if open.start() > pos {
            chunks.push(Chunk::Code {
                text: &text[pos..open.start()],
                offset: pos,
            });
        }
        let body_start = open.end();
        match RAW_CLOSE_RE.find_at(text, body_start) {
            Some(close) => {
                chunks.push(Chunk::Raw {
                    text: &text[body_start..close.start()],
                    offset: body_start,
                });
                pos = close.end();
            }
            None => {
                chunks.push(Chunk::Raw {
                    text: &text[body_start..],
                    offset: body_start,
                });
                return chunks;
            }
        }
    }

    if pos < text.len() {
        chunks.push(Chunk::Code {
            text: &text[pos..],
            offset: pos,
        });
    }
    chunks
}

/// Whether `text` contains at least one complete template tag outside raw blocks.
///
/// The first opener found must have a closer after it; a stray `<%` with no
/// closer means the content is not a template.
pub fn has_embedded_code(text: &str) -> bool {
    let mut chunks = split_raw_blocks(text).into_iter().filter_map(|c| match c {
        Chunk::Code { text, .. } => Some(text),
        Chunk::Raw { .. } => None,
    });

    // Tags never span a raw block, so each code chunk is scanned on its own.
    match chunks.find_map(|chunk| chunk.find(OPEN_TAG).map(|i| &chunk[i + OPEN_TAG.len()..])) {
        Some(rest) => rest.contains(CLOSE_TAG),
        None => false,
    }
}
