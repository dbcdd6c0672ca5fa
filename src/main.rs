mod api;
mod audio;
mod config;
mod metadata;
mod session;
mod ui;

use crate::api::TtsOptions;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "vox")]
#[command(about = "Text-to-speech from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize text and play it with a live waveform
    Tts {
        /// Text to synthesize
        text: String,

        /// Voice to speak with
        #[arg(short, long)]
        speaker: String,

        /// Model id (arcana, arcanav2, mist, mistv2)
        #[arg(short, long, default_value = api::MODEL_ARCANA)]
        model: String,

        /// Language code, ISO 639-1 or 639-3 (default: eng)
        #[arg(short, long, default_value = "")]
        lang: String,

        /// Output sampling rate in Hz (server default when omitted)
        #[arg(long)]
        sampling_rate: Option<u32>,

        /// Speed multiplier, must be positive (server default when omitted)
        #[arg(long)]
        speed_alpha: Option<f64>,

        /// Save the audio (with embedded metadata) to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stream and analyze without playing audio
        #[arg(long)]
        no_play: bool,
    },

    /// Play a saved audio file, recovering its transcript
    Play {
        /// WAV or MP3 file to play
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    match cli.command {
        Commands::Tts {
            text,
            speaker,
            model,
            lang,
            sampling_rate,
            speed_alpha,
            output,
            no_play,
        } => {
            if !api::is_valid_model_id(&model) {
                bail!(
                    "invalid model id '{model}' (valid options: {})",
                    api::MODEL_IDS.join(", ")
                );
            }
            if !lang.is_empty() && !api::is_valid_lang(&lang, &model) {
                bail!(
                    "language '{lang}' is not supported by model '{model}' (supported: {})",
                    api::valid_langs_for_model(&model).join(", ")
                );
            }
            if speed_alpha.is_some_and(|alpha| alpha <= 0.0) {
                bail!("--speed-alpha must be positive");
            }
            let opts = TtsOptions {
                speaker,
                model_id: model,
                lang,
                sampling_rate,
                speed_alpha,
            };
            ui::run_tts(&text, opts, output, !no_play).await
        }
        Commands::Play { file } => ui::run_play(&file).await,
    }
}

/// Log to a file: the TUI owns the terminal, so nothing may write to
/// stdout/stderr while it runs. Level comes from `VOX_LOG`, default `info`.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env("VOX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let log_path = match directories::ProjectDirs::from("", "", "vox") {
        Some(dirs) => {
            std::fs::create_dir_all(dirs.data_dir()).ok();
            dirs.data_dir().join("vox.log")
        }
        None => std::env::temp_dir().join("vox.log"),
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;
    let writer = Arc::new(Mutex::new(file));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(move || FileLogWriter {
            file: Arc::clone(&writer),
        })
        .try_init();
    Ok(())
}

struct FileLogWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl Write for FileLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("failed to lock log file"))?;
        guard.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("failed to lock log file"))?;
        guard.flush()
    }
}
