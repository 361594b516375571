//! Structural segmentation: text → Sections → Units.

use serde::Serialize;

use super::boundary::BoundaryDetector;
use super::numerals::NumeralMagnitude;
use crate::error::{PipelineError, Result};

/// A labeled slice of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    /// 1-based position in document order
    pub ordinal: usize,
    /// Trimmed heading text; `None` for a preamble or an undivided document
    pub title: Option<String>,
    /// Number parsed from the heading, if any
    pub number: Option<u64>,
    /// Exact heading text as it appears in the document
    pub heading: String,
    /// Text between the heading and the next heading
    pub body: String,
}

impl Section {
    /// Heading and body, exactly as they appear in the document.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.heading.len() + self.body.len());
        text.push_str(&self.heading);
        text.push_str(&self.body);
        text
    }
}

/// Consecutive Sections synthesized into one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    /// 0-based position among the document's Units
    pub group_index: usize,
    pub title: Option<String>,
    pub sections: Vec<Section>,
}

impl Unit {
    /// Concatenated text of all Sections.
    pub fn text(&self) -> String {
        self.sections.iter().map(Section::text).collect()
    }

    pub fn first_ordinal(&self) -> usize {
        self.sections.first().map(|s| s.ordinal).unwrap_or(0)
    }

    pub fn last_ordinal(&self) -> usize {
        self.sections.last().map(|s| s.ordinal).unwrap_or(0)
    }

    /// Title for display and file names, falling back to the ordinal range.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None if self.first_ordinal() == self.last_ordinal() => {
                format!("Part {}", self.first_ordinal())
            }
            None => format!("Part {}-{}", self.first_ordinal(), self.last_ordinal()),
        }
    }
}

/// Cuts documents into Sections and groups them into Units.
#[derive(Debug, Clone)]
pub struct Segmenter {
    detector: BoundaryDetector,
    group_size: usize,
    title_separator: Option<String>,
}

impl Segmenter {
    pub fn new(
        group_size: usize,
        magnitude: NumeralMagnitude,
        title_separator: Option<String>,
    ) -> Result<Self> {
        if group_size == 0 {
            return Err(PipelineError::config("group size must be at least 1"));
        }
        Ok(Self {
            detector: BoundaryDetector::new(magnitude)?,
            group_size,
            title_separator,
        })
    }

    /// Cut `text` into Sections at detected headings.
    pub fn sections(&self, text: &str) -> Vec<Section> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let boundaries = self.detector.detect(text);
        if boundaries.is_empty() {
            return vec![Section {
                ordinal: 1,
                title: None,
                number: None,
                heading: String::new(),
                body: text.to_string(),
            }];
        }

        let mut sections = Vec::with_capacity(boundaries.len() + 1);

        let preamble = &text[..boundaries[0].offset];
        if !preamble.trim().is_empty() {
            sections.push(Section {
                ordinal: 1,
                title: None,
                number: None,
                heading: String::new(),
                body: preamble.to_string(),
            });
        }

        for (i, boundary) in boundaries.iter().enumerate() {
            let body_end = boundaries
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or(text.len());
            sections.push(Section {
                ordinal: sections.len() + 1,
                title: Some(boundary.title.clone()),
                number: boundary.number,
                heading: text[boundary.offset..boundary.end].to_string(),
                body: text[boundary.end..body_end].to_string(),
            });
        }

        log::debug!(
            "Found {} sections ({} headings)",
            sections.len(),
            boundaries.len()
        );
        sections
    }

    /// Cut `text` into Sections and group them into Units.
    pub fn segment(&self, text: &str) -> Vec<Unit> {
        group_sections(
            self.sections(text),
            self.group_size,
            self.title_separator.as_deref(),
        )
    }
}

/// Partition Sections into Units of at most `group_size`, order preserved.
///
/// `group_size` must be non-zero; [`Segmenter::new`] enforces this.
pub fn group_sections(
    sections: Vec<Section>,
    group_size: usize,
    separator: Option<&str>,
) -> Vec<Unit> {
    let group_size = group_size.max(1);
    let mut units = Vec::with_capacity(sections.len().div_ceil(group_size));
    let mut iter = sections.into_iter().peekable();

    while iter.peek().is_some() {
        let group: Vec<Section> = iter.by_ref().take(group_size).collect();
        let titles: Vec<&str> = group.iter().filter_map(|s| s.title.as_deref()).collect();
        let title = unit_title(&titles, separator);
        units.push(Unit {
            group_index: units.len(),
            title,
            sections: group,
        });
    }

    units
}

/// Title of a Unit from its Sections' titles.
///
/// One shared title is used as is; otherwise the first and last titles are
/// joined by `separator`, or by `至` / `" to "` depending on the script.
pub fn unit_title(titles: &[&str], separator: Option<&str>) -> Option<String> {
    let first = *titles.first()?;
    let last = *titles.last()?;

    if titles.iter().all(|t| *t == first) {
        return Some(first.to_string());
    }

    let separator = separator.unwrap_or(if contains_cjk(first) || contains_cjk(last) {
        "至"
    } else {
        " to "
    });
    Some(format!("{}{}{}", first, separator, last))
}

fn contains_cjk(s: &str) -> bool {
    s.chars().any(|c| {
        matches!(c,
            '\u{4E00}'..='\u{9FFF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{F900}'..='\u{FAFF}'
            | '\u{3040}'..='\u{30FF}'
            | '\u{AC00}'..='\u{D7AF}')
    })
}

/// Segment with default settings.
pub fn segment(text: &str, group_size: usize) -> Result<Vec<Unit>> {
    Ok(Segmenter::new(group_size, NumeralMagnitude::default(), None)?.segment(text))
}
