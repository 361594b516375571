//! Renaming numbered artifacts to Chinese chapter names and back.
//!
//! `3-5.mp3` becomes `第三章-第五章.mp3` and `7.mp3` becomes `第七章.mp3`.
//! Restoring turns `第七章.mp3` into `7-7.mp3`.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::Result;
use crate::text::numerals::{parse_numeral, to_chinese};

const NUMERAL: &str = "[零〇一二两三四五六七八九十百千万亿壹贰叁肆伍陆柒捌玖拾佰仟萬]+";

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)-(\d+)(\.\w+)$").expect("valid regex"))
}

fn single_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(\.\w+)$").expect("valid regex"))
}

fn chinese_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^第(?P<first>{n})章(?:-第(?P<last>{n})章)?(?P<ext>\.\w+)$",
            n = NUMERAL
        ))
        .expect("valid regex")
    })
}

/// One planned rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameSummary {
    pub renamed: Vec<Rename>,
    /// Targets that already existed
    pub skipped: Vec<Rename>,
}

fn shift(n: u64, offset: i64) -> Option<u64> {
    n.checked_add_signed(offset).filter(|n| *n > 0)
}

/// `3-5.mp3` → `第三章-第五章.mp3`, `7.mp3` → `第七章.mp3`; numbers are
/// shifted by `offset` first.
pub fn to_chinese_name(name: &str, offset: i64) -> Option<String> {
    if let Some(caps) = range_re().captures(name) {
        let first = shift(caps[1].parse().ok()?, offset)?;
        let last = shift(caps[2].parse().ok()?, offset)?;
        let ext = &caps[3];
        return Some(if first == last {
            format!("第{}章{}", to_chinese(first), ext)
        } else {
            format!("第{}章-第{}章{}", to_chinese(first), to_chinese(last), ext)
        });
    }

    let caps = single_re().captures(name)?;
    let n = shift(caps[1].parse().ok()?, offset)?;
    Some(format!("第{}章{}", to_chinese(n), &caps[2]))
}

/// `第三章-第五章.mp3` → `3-5.mp3`, `第七章.mp3` → `7-7.mp3`; numbers are
/// shifted back by `offset`.
pub fn to_numbered_name(name: &str, offset: i64) -> Option<String> {
    let caps = chinese_re().captures(name)?;
    let first = shift(parse_numeral(&caps["first"])?, -offset)?;
    let last = match caps.name("last") {
        Some(last) => shift(parse_numeral(last.as_str())?, -offset)?,
        None => first,
    };
    Some(format!("{}-{}{}", first, last, &caps["ext"]))
}

/// Work out the renames for the files directly inside `dir`.
pub fn plan(dir: &Path, restore: bool, offset: i64) -> Result<Vec<Rename>> {
    let mut plans = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let target = if restore {
            to_numbered_name(&name, offset)
        } else {
            to_chinese_name(&name, offset)
        };
        if let Some(target) = target {
            if target != name {
                plans.push(Rename {
                    from: entry.path(),
                    to: dir.join(target),
                });
            }
        }
    }

    plans.sort_by(|a, b| a.from.cmp(&b.from));
    Ok(plans)
}

/// Rename the files in `dir`, never overwriting an existing file.
///
/// With `dry_run` nothing is touched and the summary lists what would be
/// renamed.
pub fn rename_dir(dir: &Path, restore: bool, dry_run: bool, offset: i64) -> Result<RenameSummary> {
    let mut summary = RenameSummary::default();

    for rename in plan(dir, restore, offset)? {
        if rename.to.exists() {
            log::warn!(
                "Not renaming {}: {} already exists",
                rename.from.display(),
                rename.to.display()
            );
            summary.skipped.push(rename);
            continue;
        }
        if !dry_run {
            fs::rename(&rename.from, &rename.to)?;
        }
        log::debug!("{} -> {}", rename.from.display(), rename.to.display());
        summary.renamed.push(rename);
    }

    Ok(summary)
}
