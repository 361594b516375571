// Document loading: plain text with encoding detection, and EPUB flattening

use encoding_rs::{BIG5, Encoding, GB18030, GBK, UTF_8, WINDOWS_1252};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Encodings tried in order for plain text input.
const CANDIDATES: [&Encoding; 5] = [UTF_8, GBK, GB18030, BIG5, WINDOWS_1252];

/// A decoded input document
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
    /// Name of the encoding the text was decoded with
    pub encoding: String,
    /// Book title from EPUB metadata
    pub title: Option<String>,
    /// Book author from EPUB metadata
    pub author: Option<String>,
}

impl Document {
    /// File name without extension, used for the output directory
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Whether `path` has an extension narrate can read
pub fn is_supported(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("txt" | "epub"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Load a document, choosing the reader by extension
pub fn load(path: &Path) -> Result<Document> {
    match extension(path).as_deref() {
        Some("epub") => load_epub(path),
        Some("txt") | None => load_text(path),
        Some(_) => Err(PipelineError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load a plain text file, detecting its encoding
pub fn load_text(path: &Path) -> Result<Document> {
    let bytes = fs::read(path)?;
    let (text, encoding) = decode(&bytes).ok_or_else(|| PipelineError::Decoding {
        path: path.to_path_buf(),
        tried: CANDIDATES
            .iter()
            .map(|e| e.name())
            .collect::<Vec<_>>()
            .join(", "),
    })?;

    log::info!("Decoded {} as {}", path.display(), encoding);

    Ok(Document {
        path: path.to_path_buf(),
        text,
        encoding: encoding.to_string(),
        title: None,
        author: None,
    })
}

/// Decode bytes with the first candidate encoding that yields clean text.
///
/// A byte order mark selects its encoding directly. Text containing control
/// characters other than whitespace is treated as a failed decode, so binary
/// files are rejected even by the single-byte fallback.
pub fn decode(bytes: &[u8]) -> Option<(String, &'static str)> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let body = &bytes[bom_len..];
        return encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .filter(|text| is_clean(text))
            .map(|text| (text.into_owned(), encoding.name()));
    }

    CANDIDATES.iter().find_map(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .filter(|text| is_clean(text))
            .map(|text| (text.into_owned(), encoding.name()))
    })
}

fn is_clean(text: &str) -> bool {
    !text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{0C}'))
}

/// Load an EPUB, flattening its chapters into one text with each chapter
/// title on its own line
pub fn load_epub(path: &Path) -> Result<Document> {
    let mut doc = epub::doc::EpubDoc::new(path)
        .map_err(|e| PipelineError::Epub(format!("Failed to open EPUB: {}", e)))?;

    let title = doc.mdata("title").map(|m| m.value.clone());
    let author = doc.mdata("creator").map(|m| m.value.clone());

    let mut chapters = Vec::new();
    let spine = doc.spine.clone();

    for spine_item in spine.iter() {
        if let Some((content_bytes, _mime)) = doc.get_resource(&spine_item.idref) {
            let html = String::from_utf8_lossy(&content_bytes).to_string();
            let chapter_title = extract_title_from_html(&html);
            let plain_text = html_to_text(&html);

            if plain_text.trim().is_empty() {
                continue;
            }

            chapters.push(flatten_chapter(chapter_title.as_deref(), &plain_text));
        }
    }

    Ok(Document {
        path: path.to_path_buf(),
        text: chapters.join("\n\n"),
        encoding: "epub".to_string(),
        title,
        author,
    })
}

/// Put the chapter title on its own line unless the text already opens with it
fn flatten_chapter(title: Option<&str>, content: &str) -> String {
    match title {
        Some(title) if !content.trim_start().starts_with(title) => {
            format!("{}\n\n{}", title, content)
        }
        _ => content.to_string(),
    }
}

/// Extract title from HTML content (looks for h1 or h2 tags)
fn extract_title_from_html(html: &str) -> Option<String> {
    let html_lower = html.to_lowercase();

    for tag in ["h1", "h2"] {
        let open = format!("<{}", tag);
        let close = format!("</{}>", tag);
        let Some(start) = html_lower.find(&open) else {
            continue;
        };
        let Some(tag_end) = html_lower[start..].find('>') else {
            continue;
        };
        let content_start = start + tag_end + 1;
        if let Some(end) = html_lower[content_start..].find(&close) {
            // Lowercasing can change byte lengths outside ASCII
            let Some(title_html) = html.get(content_start..content_start + end) else {
                continue;
            };
            let title = strip_html_tags(title_html);
            if !title.trim().is_empty() {
                return Some(title.trim().to_string());
            }
        }
    }

    None
}

/// Strip HTML tags from a string
fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;

    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result
}

/// Convert HTML to plain text, keeping paragraph breaks
fn html_to_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 1000);

    let mut result = String::new();
    let mut prev_was_blank = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if !prev_was_blank && !result.is_empty() {
                result.push_str("\n\n");
                prev_was_blank = true;
            }
            continue;
        }

        if !result.is_empty() && !result.ends_with('\n') {
            result.push('\n');
        }
        prev_was_blank = false;
        result.push_str(trimmed);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_decode_utf8() {
        let (text, encoding) = decode("第一章 开始".as_bytes()).unwrap();
        assert_eq!(text, "第一章 开始");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_decode_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("正文".as_bytes());
        let (text, encoding) = decode(&bytes).unwrap();
        assert_eq!(text, "正文");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_decode_gbk() {
        let (bytes, _, _) = GBK.encode("第一章 开始\n内容");
        let (text, encoding) = decode(&bytes).unwrap();
        assert_eq!(text, "第一章 开始\n内容");
        assert_eq!(encoding, "GBK");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        let (text, encoding) = decode(&bytes).unwrap();
        assert_eq!(encoding, "windows-1252");
        assert_eq!(text, "café");
    }

    #[test]
    fn test_binary_is_not_decoded() {
        assert!(decode(&[0x00, 0x01, 0x02, 0xFF]).is_none());
    }

    #[test]
    fn test_load_text_reports_decoding_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.txt");
        fs::write(&path, [0u8, 159, 146, 150]).unwrap();
        assert!(matches!(load(&path), Err(PipelineError::Decoding { .. })));
    }

    #[test]
    fn test_load_text_and_stem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("十日终焉.txt");
        fs::write(&path, "第一章\n正文").unwrap();
        let doc = load(&path).unwrap();
        assert_eq!(doc.stem(), "十日终焉");
        assert_eq!(doc.encoding, "UTF-8");
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load(Path::new("book.pdf")),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        assert!(is_supported(Path::new("a/b.TXT")));
        assert!(!is_supported(Path::new("a/b.mp3")));
    }

    #[test]
    fn test_extract_title_h1() {
        let html = "<html><body><h1>第一章 开始</h1><p>正文</p></body></html>";
        assert_eq!(extract_title_from_html(html), Some("第一章 开始".to_string()));
    }

    #[test]
    fn test_flatten_chapter() {
        assert_eq!(flatten_chapter(Some("第一章"), "正文"), "第一章\n\n正文");
        assert_eq!(flatten_chapter(Some("第一章"), "第一章\n\n正文"), "第一章\n\n正文");
        assert_eq!(flatten_chapter(None, "正文"), "正文");
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html_tags("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html_tags("<a href=\"test\">Link</a>"), "Link");
    }
}
