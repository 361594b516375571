//! Size-bounded text splitting for synthesis requests.
//!
//! Text is cut at paragraph breaks first, then at sentence ends, and only as a
//! last resort at an arbitrary character boundary. Every piece is a contiguous
//! slice of the input, so joining the pieces gives back the input exactly.

use regex::Regex;
use std::sync::OnceLock;

use super::segmenter::Unit;
use super::Chunk;
use crate::error::{PipelineError, Result};

/// Smallest ceiling that can hold any UTF-8 character.
pub const MIN_MAX_BYTES: usize = 4;

/// Default ceiling in UTF-8 bytes for a single synthesis request.
pub const DEFAULT_MAX_BYTES: usize = 5000;

/// Blank line, plus any whitespace that follows it.
static PARAGRAPH_BREAK: OnceLock<Regex> = OnceLock::new();

fn paragraph_break() -> &'static Regex {
    PARAGRAPH_BREAK.get_or_init(|| {
        Regex::new(r"\n[ \t\r\u{3000}]*\n\s*").expect("paragraph break pattern should compile")
    })
}

/// Split text into pieces of at most `max_bytes` UTF-8 bytes.
///
/// # Arguments
/// * `text` - The text to split
/// * `max_bytes` - Byte ceiling per piece (at least [`MIN_MAX_BYTES`])
///
/// # Returns
/// Non-empty pieces whose concatenation equals `text`. Empty text gives no
/// pieces.
pub fn split(text: &str, max_bytes: usize) -> Result<Vec<String>> {
    if max_bytes < MIN_MAX_BYTES {
        return Err(PipelineError::config(format!(
            "max chunk bytes must be at least {}, got {}",
            MIN_MAX_BYTES, max_bytes
        )));
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }
    if text.len() <= max_bytes {
        return Ok(vec![text.to_string()]);
    }

    let mut pieces = Vec::new();
    for paragraph in paragraphs(text) {
        if paragraph.len() <= max_bytes {
            pieces.push(paragraph);
            continue;
        }
        for sentence in sentences(paragraph) {
            if sentence.len() <= max_bytes {
                pieces.push(sentence);
            } else {
                pieces.extend(hard_cut(sentence, max_bytes));
            }
        }
    }

    Ok(absorb_blank_chunks(text, pack(&pieces, max_bytes), max_bytes))
}

/// Greedily join consecutive pieces while they fit under `max_bytes`.
fn pack(pieces: &[&str], max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if !current.is_empty() && current.len() + piece.len() > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(piece);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

/// Move chunk boundaries so that no chunk is whitespace only.
///
/// A blank chunk joins the chunk before it when that fits, otherwise takes
/// the next visible character after it, otherwise the last visible character
/// before it. A whitespace run too long for any of these is left alone.
fn absorb_blank_chunks(text: &str, chunks: Vec<String>, max_bytes: usize) -> Vec<String> {
    let mut cuts = Vec::with_capacity(chunks.len() + 1);
    let mut offset = 0;
    cuts.push(offset);
    for chunk in &chunks {
        offset += chunk.len();
        cuts.push(offset);
    }

    let mut i = 0;
    while i + 1 < cuts.len() {
        let (start, end) = (cuts[i], cuts[i + 1]);
        if !is_blank(&text[start..end]) {
            i += 1;
            continue;
        }

        if i > 0 && end - cuts[i - 1] <= max_bytes {
            cuts.remove(i);
            continue;
        }

        let next_visible = text[end..]
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map(|(at, c)| end + at + c.len_utf8());
        if let Some(visible_end) = next_visible.filter(|&v| v - start <= max_bytes) {
            cuts.retain(|&cut| cut <= start || cut > visible_end);
            cuts.insert(i + 1, visible_end);
            i += 1;
            continue;
        }

        if i > 0 {
            let before = cuts[i - 1];
            let last_visible = text[before..start]
                .char_indices()
                .rev()
                .find(|(_, c)| !c.is_whitespace())
                .map(|(at, _)| before + at);
            if let Some(visible_start) = last_visible.filter(|&v| end - v <= max_bytes) {
                if visible_start == before {
                    cuts.remove(i);
                    continue;
                }
                if !is_blank(&text[before..visible_start]) {
                    cuts[i] = visible_start;
                }
            }
        }
        i += 1;
    }

    cuts.windows(2)
        .map(|w| text[w[0]..w[1]].to_string())
        .collect()
}

/// Cut at blank lines; each separator stays with the paragraph before it.
fn paragraphs(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;

    for m in paragraph_break().find_iter(text) {
        pieces.push(&text[start..m.end()]);
        start = m.end();
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

fn is_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '!' | '?' | '；' | ';' | '…' | '\n')
}

fn is_closer(c: char) -> bool {
    matches!(
        c,
        '”' | '’' | '」' | '』' | '）' | '》' | '】' | '〉' | ')' | ']' | '}' | '"' | '\''
    )
}

/// Cut after sentence terminators, keeping trailing closers and whitespace.
fn sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let ends_sentence = match c {
            '.' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            c => is_terminator(c),
        };
        if !ends_sentence {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if is_terminator(next) || is_closer(next) || next.is_whitespace() {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        pieces.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

/// Cut at the largest character boundary not exceeding `max_bytes`.
fn hard_cut(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        pieces.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }

    pieces
}

/// Split every Unit into Chunks, numbered per Unit from 0.
pub fn chunk_units(units: &[Unit], max_bytes: usize) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for unit in units {
        for (sequence, text) in split(&unit.text(), max_bytes)?.into_iter().enumerate() {
            chunks.push(Chunk {
                unit: unit.group_index,
                sequence,
                text,
            });
        }
    }
    Ok(chunks)
}
