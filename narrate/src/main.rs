//! narrate - Convert long text documents into chaptered audio files

mod audio;
mod config;
mod document;
mod error;
mod pipeline;
mod rename;
mod report;
mod resume;
mod split;
mod synth;
mod text;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{MarkerKind, NarrateConfig};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::Orchestrator;
use report::{DocumentState, UnitStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use synth::StopSignal;
use text::NumeralMagnitude;

#[derive(Parser, Debug)]
#[command(name = "narrate")]
#[command(about = "Convert long text documents into chaptered audio files", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize documents into one audio file per group of chapters
    Run(RunArgs),
    /// Split a document into text files of grouped chapters
    Split {
        /// Document to split (.txt or .epub)
        file: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Chapters per file
        #[arg(short, long)]
        group_size: Option<usize>,
    },
    /// Rename numbered files (3-5.mp3) to Chinese chapter names, or back
    Rename {
        /// Directory containing the files
        dir: PathBuf,
        /// Turn 第三章-第五章.mp3 back into 3-5.mp3
        #[arg(long)]
        restore: bool,
        /// Show what would be renamed without renaming
        #[arg(long)]
        dry_run: bool,
        /// Add this to every chapter number
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,
    },
    /// Merge a document's audio files into an M4B audiobook with chapters
    M4b {
        /// Directory holding the audio files
        dir: PathBuf,
        /// Output file (default: <dir>.m4b)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Book title
        #[arg(long)]
        title: Option<String>,
        /// Book author
        #[arg(long)]
        author: Option<String>,
        /// Cover image
        #[arg(long)]
        cover: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Documents or directories of documents
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Directory that receives one folder per document
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Voice name (e.g. zh-CN-YunxiNeural)
    #[arg(long)]
    voice: Option<String>,

    /// Speaking rate (e.g. +45%)
    #[arg(long, allow_hyphen_values = true)]
    rate: Option<String>,

    /// Volume (e.g. +0%)
    #[arg(long, allow_hyphen_values = true)]
    volume: Option<String>,

    /// Pitch (e.g. +0Hz)
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<String>,

    /// Chapters per audio file
    #[arg(short, long)]
    group_size: Option<usize>,

    /// Largest request size in bytes
    #[arg(long)]
    max_bytes: Option<usize>,

    /// Synthesis requests running at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Attempts per chunk, including the first
    #[arg(long)]
    retries: Option<u32>,

    /// Largest numeral unit in chapter headings
    #[arg(long)]
    magnitude: Option<NumeralMagnitude>,

    /// How finished documents are remembered
    #[arg(long, value_enum)]
    marker: Option<MarkerKind>,

    /// Proxy for the synthesis service
    #[arg(long)]
    proxy: Option<String>,

    /// Remove claims left behind by a crashed run
    #[arg(long)]
    break_locks: bool,
}

impl RunArgs {
    /// Command-line values take precedence over the config file.
    fn apply(&self, config: &mut NarrateConfig) {
        if let Some(output) = &self.output {
            config.output.root = Some(output.clone());
        }
        if let Some(voice) = &self.voice {
            config.voice.voice = voice.clone();
        }
        if let Some(rate) = &self.rate {
            config.voice.rate = rate.clone();
        }
        if let Some(volume) = &self.volume {
            config.voice.volume = Some(volume.clone());
        }
        if let Some(pitch) = &self.pitch {
            config.voice.pitch = Some(pitch.clone());
        }
        if let Some(group_size) = self.group_size {
            config.segmenting.group_size = group_size;
        }
        if let Some(max_bytes) = self.max_bytes {
            config.segmenting.max_chunk_bytes = max_bytes;
        }
        if let Some(concurrency) = self.concurrency {
            config.scheduler.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.scheduler.max_retries = retries;
        }
        if let Some(magnitude) = self.magnitude {
            config.segmenting.numeral_magnitude = magnitude;
        }
        if let Some(marker) = self.marker {
            config.output.marker = marker;
        }
        if let Some(proxy) = &self.proxy {
            config.provider.proxy = Some(proxy.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set default voice
    SetVoice {
        /// Voice name (e.g. zh-CN-XiaoxiaoNeural)
        voice: String,
    },
    /// Set default speaking rate
    SetRate {
        /// Rate (e.g. +45%)
        #[arg(allow_hyphen_values = true)]
        rate: String,
    },
    /// Set default chapters per file
    SetGroupSize {
        value: usize,
    },
    /// Set default request size limit in bytes
    SetMaxBytes {
        value: usize,
    },
    /// Set default number of concurrent requests
    SetConcurrency {
        value: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Split {
            file,
            output,
            group_size,
        } => {
            let mut config = NarrateConfig::load().context("Failed to load configuration")?;
            if let Some(group_size) = group_size {
                config.segmenting.group_size = group_size;
            }
            let written = split::split_document(&file, &output, &config.segmenting)
                .with_context(|| format!("Failed to split {}", file.display()))?;
            println!("Wrote {} file(s) to {}", written.len(), output.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rename {
            dir,
            restore,
            dry_run,
            offset,
        } => {
            let summary = rename::rename_dir(&dir, restore, dry_run, offset)
                .with_context(|| format!("Failed to rename files in {}", dir.display()))?;
            for item in &summary.renamed {
                let verb = if dry_run { "Would rename" } else { "Renamed" };
                println!(
                    "{}: {} -> {}",
                    verb,
                    file_name(&item.from),
                    file_name(&item.to)
                );
            }
            for item in &summary.skipped {
                println!("Skipped {}: target exists", file_name(&item.from));
            }
            println!(
                "{} renamed, {} skipped",
                summary.renamed.len(),
                summary.skipped.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::M4b {
            dir,
            output,
            title,
            author,
            cover,
        } => {
            m4b_command(dir, output, title, author, cover)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            handle_config_command(&action)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

async fn run_command(args: RunArgs) -> Result<ExitCode> {
    let mut config = NarrateConfig::load().context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    let documents = pipeline::collect_inputs(&args.inputs, args.recursive)?;
    if documents.is_empty() {
        anyhow::bail!("No .txt or .epub documents found");
    }
    log::info!("{} document(s) to process", documents.len());

    let synthesizer = speech_client::get_synthesizer(&config.provider)
        .context("Failed to set up speech synthesis")?;
    let synthesizer: Arc<dyn speech_client::Synthesizer> = Arc::from(synthesizer);
    log::info!(
        "Using {} with voice {} at {}",
        synthesizer.name(),
        config.voice.voice,
        config.voice.rate
    );

    let markers = resume::store_for(&config.output)?;
    log::debug!("Marker store: {}", markers.name());

    let stop = StopSignal::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; finishing requests in flight");
            ctrl_c.stop();
        }
    });

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let orchestrator = Orchestrator::new(config, synthesizer, markers)?
        .with_stop_signal(stop)
        .with_progress(pb.clone())
        .with_break_locks(args.break_locks);

    let batch = orchestrator.process_batch(&documents).await;
    pb.finish_and_clear();

    println!();
    for document in &batch.documents {
        println!("{}", document.summary());
    }
    println!();
    println!(
        "Completed: {}, Partial: {}, Skipped: {}, Failed: {}",
        batch.count(DocumentState::Completed),
        batch.count(DocumentState::PartiallyCompleted),
        batch.count(DocumentState::Skipped),
        batch.count(DocumentState::Failed)
    );
    let units: usize = batch.documents.iter().map(|d| d.units.len()).sum();
    let written: usize = batch
        .documents
        .iter()
        .map(|d| d.count(UnitStatus::Complete) + d.count(UnitStatus::Partial))
        .sum();
    println!("Units: {} total, {} written", units, written);

    Ok(ExitCode::from(batch.exit_code() as u8))
}

fn m4b_command(
    dir: PathBuf,
    output: Option<PathBuf>,
    title: Option<String>,
    author: Option<String>,
    cover: Option<PathBuf>,
) -> Result<()> {
    if !audio::is_ffmpeg_available() {
        anyhow::bail!("ffmpeg and ffprobe must be installed and on the PATH");
    }

    let config = NarrateConfig::load().context("Failed to load configuration")?;
    let files = audio::collect_artifacts(&dir, &config.output.extension)?;
    if files.is_empty() {
        anyhow::bail!(
            "No .{} files found in {}",
            config.output.extension,
            dir.display()
        );
    }

    let output = output.unwrap_or_else(|| dir.with_extension("m4b"));
    let title = title.or_else(|| dir.file_name().map(|n| n.to_string_lossy().to_string()));

    eprintln!("Assembling {} file(s) into {}", files.len(), output.display());
    let book = audio::BookInfo {
        title,
        author,
        cover,
    };
    audio::assemble_m4b(&files, &output, &book)?;

    let metadata = std::fs::metadata(&output)?;
    let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
    println!("Output: {} ({:.1} MB)", output.display(), size_mb);
    Ok(())
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = NarrateConfig::load()?;
            println!("Configuration file: {:?}", NarrateConfig::config_path()?);
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::SetVoice { voice } => {
            let mut config = NarrateConfig::load()?;
            config.voice.voice = voice.clone();
            save_checked(&config)?;
            println!("Default voice set to: {}", voice);
        }
        ConfigAction::SetRate { rate } => {
            let mut config = NarrateConfig::load()?;
            config.voice.rate = rate.clone();
            save_checked(&config)?;
            println!("Default rate set to: {}", rate);
        }
        ConfigAction::SetGroupSize { value } => {
            let mut config = NarrateConfig::load()?;
            config.segmenting.group_size = *value;
            save_checked(&config)?;
            println!("Default group size set to: {}", value);
        }
        ConfigAction::SetMaxBytes { value } => {
            let mut config = NarrateConfig::load()?;
            config.segmenting.max_chunk_bytes = *value;
            save_checked(&config)?;
            println!("Default request size limit set to: {} bytes", value);
        }
        ConfigAction::SetConcurrency { value } => {
            let mut config = NarrateConfig::load()?;
            config.scheduler.concurrency = *value;
            save_checked(&config)?;
            println!("Default concurrency set to: {}", value);
        }
    }
    Ok(())
}

/// Refuse to save settings that every run would reject.
fn save_checked(config: &NarrateConfig) -> Result<()> {
    config.validate()?;
    config.save()
}
