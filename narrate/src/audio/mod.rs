//! Audio assembly module for creating M4B audiobooks with chapters.

pub mod assembler;
mod metadata;

pub use assembler::{BookInfo, assemble_m4b, collect_artifacts, is_ffmpeg_available};
