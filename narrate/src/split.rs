//! Writing each Unit's text to its own file, without synthesis.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SegmentingConfig;
use crate::document;
use crate::error::Result;
use crate::text::{Segmenter, Unit};

/// `<first>-<last>.txt`, using 1-based Section ordinals.
pub fn file_name(unit: &Unit) -> String {
    format!("{}-{}.txt", unit.first_ordinal(), unit.last_ordinal())
}

/// Segment `path` and write every Unit into `out_dir` as UTF-8 text.
pub fn split_document(
    path: &Path,
    out_dir: &Path,
    segmenting: &SegmentingConfig,
) -> Result<Vec<PathBuf>> {
    let doc = document::load(path)?;
    let segmenter = Segmenter::new(
        segmenting.group_size,
        segmenting.numeral_magnitude,
        segmenting.title_separator.clone(),
    )?;
    let units = segmenter.segment(&doc.text);
    if units.is_empty() {
        log::warn!("{} has no text to split", path.display());
        return Ok(Vec::new());
    }

    fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(units.len());
    for unit in &units {
        let target = out_dir.join(file_name(unit));
        fs::write(&target, unit.text())?;
        log::debug!("{}: {}", target.display(), unit.display_title());
        written.push(target);
    }

    log::info!(
        "Split {} ({}) into {} file(s)",
        path.display(),
        doc.encoding,
        written.len()
    );
    Ok(written)
}
