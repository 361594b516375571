//! FFmpeg metadata generation for M4B chapter markers.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Information about a chapter for M4B metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    pub title: String,
    /// Start position in milliseconds
    pub start_ms: u64,
    /// End position in milliseconds
    pub end_ms: u64,
}

impl ChapterInfo {
    pub fn new(title: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            title: title.into(),
            start_ms,
            end_ms,
        }
    }
}

/// Create an FFMETADATA1 file with book tags and chapter markers.
pub fn create_ffmpeg_metadata(
    title: Option<&str>,
    author: Option<&str>,
    chapters: &[ChapterInfo],
    output_path: &Path,
) -> Result<()> {
    let file = File::create(output_path).context("Failed to create metadata file")?;
    let mut file = BufWriter::new(file);

    writeln!(file, ";FFMETADATA1")?;
    if let Some(title) = title {
        writeln!(file, "title={}", escape_metadata_value(title))?;
        writeln!(file, "album={}", escape_metadata_value(title))?;
    }
    if let Some(author) = author {
        writeln!(file, "artist={}", escape_metadata_value(author))?;
        writeln!(file, "author={}", escape_metadata_value(author))?;
    }
    writeln!(file, "genre=Audiobook")?;
    writeln!(file)?;

    for chapter in chapters {
        writeln!(file, "[CHAPTER]")?;
        writeln!(file, "TIMEBASE=1/1000")?;
        writeln!(file, "START={}", chapter.start_ms)?;
        writeln!(file, "END={}", chapter.end_ms)?;
        writeln!(file, "title={}", escape_metadata_value(&chapter.title))?;
        writeln!(file)?;
    }

    file.flush()?;
    Ok(())
}

/// Escape special characters in metadata values.
///
/// FFmpeg metadata values need to escape: = ; # \ and newlines
fn escape_metadata_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '=' | ';' | '#' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            _ => escaped.push(c),
        }
    }

    escaped
}

/// One chapter per file, laid end to end.
pub fn build_chapter_info(files: &[(String, u64)]) -> Vec<ChapterInfo> {
    let mut start = 0;
    files
        .iter()
        .map(|(title, duration_ms)| {
            let chapter = ChapterInfo::new(title.clone(), start, start + duration_ms);
            start += duration_ms;
            chapter
        })
        .collect()
}
