//! Chapter boundary detection.
//!
//! Headings are found with three line-anchored rules, tried in priority order:
//! native numbered headings (`第十二章 标题`), generic `Chapter 12` markers, and
//! lines holding nothing but a number. The last rule is only consulted when
//! the first two find nothing, since bare numbers are common in body text.

use regex::Regex;

use super::numerals::{NumeralMagnitude, parse_numeral};
use crate::error::{PipelineError, Result};

/// Characters that may indent a heading line.
const INDENT: &str = r"[ \t\u{3000}]*";

/// Which rule produced a boundary. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rule {
    NativeHeading,
    ChapterMarker,
    StandaloneNumber,
}

/// A detected heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// Byte offset where the heading line starts
    pub offset: usize,
    /// Byte offset just past the heading text (before the line break)
    pub end: usize,
    /// Heading line with surrounding whitespace trimmed
    pub title: String,
    pub rule: Rule,
    /// Number parsed from the heading; advisory, never used for ordering
    pub number: Option<u64>,
}

/// Finds chapter headings in decoded text.
#[derive(Debug, Clone)]
pub struct BoundaryDetector {
    native: Regex,
    marker: Regex,
    standalone: Regex,
}

impl BoundaryDetector {
    pub fn new(magnitude: NumeralMagnitude) -> Result<Self> {
        let native = format!(
            r"(?m)^{indent}第(?P<num>[0-9０-９]+|[{chars}]+)[章回节卷部篇集][^\n]{{0,40}}$",
            indent = INDENT,
            chars = magnitude.numeral_chars(),
        );
        let marker = format!(r"(?mi)^{}chapter[ \t]*(?P<num>[0-9]+)[^\n]{{0,60}}$", INDENT);
        let standalone = format!(
            r"(?m)^{indent}(?P<num>[0-9]+)[ \t\u{{3000}}\r]*$",
            indent = INDENT
        );

        Ok(Self {
            native: compile(&native)?,
            marker: compile(&marker)?,
            standalone: compile(&standalone)?,
        })
    }

    /// Find all headings in `text`, in document order, without overlaps.
    pub fn detect(&self, text: &str) -> Vec<Boundary> {
        let mut candidates = self.matches(&self.native, Rule::NativeHeading, text);
        candidates.extend(self.matches(&self.marker, Rule::ChapterMarker, text));

        if candidates.is_empty() {
            candidates = self.matches(&self.standalone, Rule::StandaloneNumber, text);
        }

        candidates.sort_by_key(|b| (b.offset, b.rule));

        let mut accepted: Vec<Boundary> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let overlaps = accepted.last().is_some_and(|prev| candidate.offset < prev.end);
            if !overlaps {
                accepted.push(candidate);
            }
        }
        accepted
    }

    fn matches(&self, regex: &Regex, rule: Rule, text: &str) -> Vec<Boundary> {
        regex
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                // A trailing \r belongs to the line break, not the heading
                let matched = whole.as_str().trim_end_matches('\r');
                let title = matched.trim();
                if title.is_empty() {
                    return None;
                }
                Some(Boundary {
                    offset: whole.start(),
                    end: whole.start() + matched.len(),
                    title: title.to_string(),
                    rule,
                    number: caps.name("num").and_then(|m| parse_numeral(m.as_str())),
                })
            })
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| PipelineError::config(format!("invalid heading pattern: {}", e)))
}

/// Detect headings with the default numeral magnitude.
pub fn detect(text: &str) -> Vec<Boundary> {
    match BoundaryDetector::new(NumeralMagnitude::default()) {
        Ok(detector) => detector.detect(text),
        Err(e) => {
            log::error!("{}", e);
            Vec::new()
        }
    }
}
