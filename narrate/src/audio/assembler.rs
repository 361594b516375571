//! M4B assembly from Unit artifacts using the system FFmpeg.

use super::metadata::{build_chapter_info, create_ffmpeg_metadata};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::synth::INCOMPLETE_TAG;

/// Book-level tags for the finished audiobook.
#[derive(Debug, Clone, Default)]
pub struct BookInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover: Option<PathBuf>,
}

/// Audio files in `dir` with `extension`, in file-name order.
///
/// Artifacts flagged incomplete are left out.
pub fn collect_artifacts(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.').to_lowercase();
    let incomplete = format!(".{}.", INCOMPLETE_TAG);

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let matches = path
            .extension()
            .is_some_and(|e| e.to_string_lossy().to_lowercase() == extension);
        if !path.is_file() || !matches {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.contains(&incomplete) {
            log::warn!("Leaving out incomplete artifact {}", name);
            continue;
        }
        files.push(path);
    }

    files.sort();
    Ok(files)
}

/// Chapter title from an artifact name: `003_第十一章至第十五章.mp3` gives
/// `第十一章至第十五章`.
pub fn chapter_title(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match stem.split_once('_') {
        Some((prefix, rest))
            if !rest.is_empty()
                && !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_digit()) =>
        {
            rest.to_string()
        }
        _ => stem,
    }
}

/// Get duration of an audio file in milliseconds using ffprobe.
pub fn get_audio_duration_ms(audio_path: &Path) -> Result<u64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(audio_path)
        .output()
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ffprobe failed on {}: {}", audio_path.display(), stderr);
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let duration_secs: f64 = duration_str
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse duration of {}", audio_path.display()))?;

    Ok((duration_secs * 1000.0) as u64)
}

/// Concat demuxer list, one `file '<path>'` line per input.
fn concat_list(files: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for path in files {
        let absolute = fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        // Escape single quotes in path
        let path_str = absolute.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", path_str));
    }
    Ok(list)
}

/// Concatenate `files` into one M4B with a chapter marker per file.
pub fn assemble_m4b(files: &[PathBuf], output_path: &Path, book: &BookInfo) -> Result<()> {
    if files.is_empty() {
        anyhow::bail!("No audio files provided");
    }

    let temp_dir = TempDir::new()?;

    let mut timeline = Vec::with_capacity(files.len());
    for file in files {
        timeline.push((chapter_title(file), get_audio_duration_ms(file)?));
    }
    let chapters = build_chapter_info(&timeline);

    let list_file = temp_dir.path().join("concat_list.txt");
    fs::write(&list_file, concat_list(files)?)?;

    let metadata_file = temp_dir.path().join("chapters.txt");
    create_ffmpeg_metadata(
        book.title.as_deref(),
        book.author.as_deref(),
        &chapters,
        &metadata_file,
    )?;

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_file)
        .arg("-i")
        .arg(&metadata_file);

    match &book.cover {
        Some(cover) if cover.exists() => {
            cmd.arg("-i").arg(cover);
            cmd.args([
                "-map",
                "0:a",
                "-map",
                "2:v",
                "-c:v",
                "png",
                "-disposition:v:0",
                "attached_pic",
            ]);
        }
        Some(cover) => {
            log::warn!("Cover {} not found, continuing without it", cover.display());
            cmd.args(["-map", "0:a"]);
        }
        None => {
            cmd.args(["-map", "0:a"]);
        }
    }

    cmd.args([
        "-map_metadata",
        "1",
        "-map_chapters",
        "1",
        "-c:a",
        "aac",
        "-b:a",
        "128k",
        "-f",
        "mp4",
    ])
    .arg(output_path);

    log::debug!("Running {:?}", cmd);
    let output = cmd.output().context("Failed to run ffmpeg M4B creation")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ffmpeg M4B creation failed: {}", stderr);
    }

    Ok(())
}

/// Check if FFmpeg is on the PATH.
pub fn is_ffmpeg_available() -> bool {
    which::which("ffmpeg").is_ok() && which::which("ffprobe").is_ok()
}
