//! Streaming synthesis orchestrator.
//!
//! State machine: Connecting (request in flight) -> Playing (live waveform
//! fed from the amplitude cell) -> Done (definitive waveform from batch
//! analysis, optional save, stats line, delayed quit).

use super::format::{format_bytes, format_duration, truncate_text};
use super::theme::Theme;
use super::transcript::{estimate_duration_from_text, Transcript};
use super::waveform::Waveform;
use crate::api::TtsOptions;
use crate::audio::analyze::{
    analyze_amplitudes, mp3_duration, scale_amplitudes, wav_duration_with_params, AmplitudeCell,
};
use crate::audio::{AudioFormat, SniffedFormat};
use crate::metadata::{self, ProvenanceMetadata, ARTIST};
use crate::session::{SessionStart, StreamOutcome};
use ratatui::text::{Line, Span};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const QUIT_DELAY: Duration = Duration::from_millis(500);

/// Amplitude scaling for the live waveform: amplify speech-level RMS, floor
/// quiet-but-present audio so it stays visible, clamp to full scale.
fn scale_live_amplitude(amp: f32) -> f32 {
    let mut scaled = amp * 5.0;
    if amp > 0.01 && scaled < 0.2 {
        scaled = 0.2;
    }
    scaled.min(1.0)
}

/// Batch resolution that fills roughly twice the terminal width, so the
/// definitive waveform spans the display.
fn samples_per_second_for(term_width: u16, duration: Duration) -> u32 {
    if duration.is_zero() {
        return 20;
    }
    let target = (term_width as f64 * 2.0) / duration.as_secs_f64();
    (target as u32).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsState {
    Connecting,
    Playing,
    Done,
}

pub struct TtsApp {
    text: String,
    opts: TtsOptions,
    output: Option<PathBuf>,
    theme: Theme,
    term_width: u16,

    pub state: TtsState,
    frame: usize,
    ttfb: Duration,
    content_type: Option<String>,
    format: Option<AudioFormat>,
    amplitude: Option<Arc<AmplitudeCell>>,
    play_start: Option<Instant>,
    audio_dur: Duration,
    audio_size: usize,

    waveform: Waveform,
    transcript: Transcript,

    saved_to: Option<String>,
    save_error: Option<String>,
    quit_at: Option<Instant>,
}

impl TtsApp {
    pub fn new(text: &str, opts: TtsOptions, output: Option<PathBuf>, term_width: u16) -> Self {
        let predicted = estimate_duration_from_text(text);
        Self {
            text: text.to_string(),
            opts,
            output,
            theme: Theme::default(),
            term_width,
            state: TtsState::Connecting,
            frame: 0,
            ttfb: Duration::ZERO,
            content_type: None,
            format: None,
            amplitude: None,
            play_start: None,
            audio_dur: Duration::ZERO,
            audio_size: 0,
            waveform: Waveform::new(term_width),
            transcript: Transcript::new(text, predicted, term_width),
            saved_to: None,
            save_error: None,
            quit_at: None,
        }
    }

    /// Rows the inline viewport needs to fit the largest view.
    pub fn viewport_height(&self) -> u16 {
        // separator + header + transcript + time + waveform rows + blank +
        // separator + saved line + stats
        (self.transcript.line_count() + 9).min(u16::MAX as usize) as u16
    }

    pub fn on_started(
        &mut self,
        start: SessionStart,
        ttfb: Duration,
        content_type: Option<String>,
    ) {
        self.state = TtsState::Playing;
        self.format = Some(start.format);
        self.amplitude = Some(start.amplitude);
        self.ttfb = ttfb;
        self.content_type = content_type;
        self.play_start = Some(Instant::now());
    }

    pub fn on_tick(&mut self) {
        self.frame += 1;
        if self.state == TtsState::Playing {
            if let Some(cell) = &self.amplitude {
                self.waveform.add_sample(scale_live_amplitude(cell.load()));
            }
            if let Some(start) = self.play_start {
                self.transcript.set_elapsed(start.elapsed());
            }
        }
    }

    pub fn should_quit(&self) -> bool {
        self.state == TtsState::Done
            && self
                .quit_at
                .map(|at| Instant::now() >= at)
                .unwrap_or(true)
    }

    /// Stream finished: pin the transcript, replace the live waveform with
    /// the batch analysis, save if requested, and arm the delayed quit.
    pub fn on_complete(&mut self, outcome: StreamOutcome) {
        self.state = TtsState::Done;
        self.audio_size = outcome.audio.len();
        if let Some(e) = &outcome.error {
            warn!(error = %e, "stream ended early");
        }

        let audio = outcome.audio;
        if !audio.is_empty() {
            let format = self.resolve_format(&audio);

            let audio = if format == SniffedFormat::Wav {
                metadata::wav::fix_wav_header(&audio)
            } else {
                audio
            };

            self.audio_dur = match (format, self.format) {
                (SniffedFormat::Wav, Some(params)) => wav_duration_with_params(&audio, &params),
                (SniffedFormat::Mp3, _) => mp3_duration(&audio),
                // No stream parameters to go on; assume 16 kB/s.
                _ => Duration::from_secs_f64(audio.len() as f64 / 16000.0),
            };
            self.transcript.set_duration(self.audio_dur);
            self.transcript.set_elapsed(self.audio_dur);

            let sps = samples_per_second_for(self.term_width, self.audio_dur);
            match analyze_amplitudes(&audio, sps) {
                Ok(amps) => {
                    self.waveform.set_samples(scale_amplitudes(&amps, 5.0, 0.2));
                    self.waveform.set_progress(1.0);
                }
                Err(e) => warn!(error = %e, "batch amplitude analysis failed"),
            }

            if let Some(path) = self.output.clone() {
                self.save(&path, audio, format);
            }
        }

        self.quit_at = Some(Instant::now() + QUIT_DELAY);
    }

    fn resolve_format(&self, audio: &[u8]) -> SniffedFormat {
        let from_header = self
            .content_type
            .as_deref()
            .map(SniffedFormat::from_content_type)
            .unwrap_or(SniffedFormat::Unknown);
        match from_header {
            SniffedFormat::Unknown => match crate::audio::sniff_format(audio) {
                SniffedFormat::Unknown => SniffedFormat::Wav,
                sniffed => sniffed,
            },
            known => known,
        }
    }

    fn save(&mut self, path: &PathBuf, audio: Vec<u8>, format: SniffedFormat) {
        let speaker = &self.opts.speaker;
        let model = &self.opts.model_id;
        let lang = self.opts.effective_lang();
        let meta = ProvenanceMetadata {
            artist: ARTIST.to_string(),
            name: format!(
                "{ARTIST} {}",
                metadata::format_comment(speaker, model, lang, &truncate_text(&self.text, 50))
            ),
            comment: metadata::format_comment(speaker, model, lang, &self.text),
        };

        // Metadata is best effort: a failed embed still saves the audio.
        let tagged = match format {
            SniffedFormat::Mp3 => match metadata::mp3::embed_mp3_metadata(&audio, &meta) {
                Ok(tagged) => tagged,
                Err(e) => {
                    warn!(error = %e, "failed to embed MP3 metadata");
                    audio
                }
            },
            _ => metadata::wav::embed_metadata(&audio, &meta),
        };

        match std::fs::write(path, &tagged) {
            Ok(()) => {
                info!(path = %path.display(), bytes = tagged.len(), "audio saved");
                self.audio_size = tagged.len();
                self.saved_to = Some(path.display().to_string());
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to save audio");
                self.save_error = Some(format!("Failed to save {}: {e}", path.display()));
            }
        }
    }

    /// One line per fact, for non-interactive runs where no viewport exists.
    pub fn plain_summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(path) = &self.saved_to {
            lines.push(format!("Audio saved to {path}"));
        }
        if let Some(err) = &self.save_error {
            lines.push(err.clone());
        }
        lines.push(format!(
            "TTFB: {}ms | Duration: {} | Size: {}",
            self.ttfb.as_millis(),
            format_duration(self.audio_dur),
            format_bytes(self.audio_size)
        ));
        lines
    }

    fn separator(&self) -> Line<'static> {
        Line::from(Span::styled(
            "─".repeat(self.term_width as usize),
            self.theme.dim,
        ))
    }

    fn header(&self) -> Line<'static> {
        Line::from(Span::styled(
            format!(
                "{ARTIST}: {} ({}) {}",
                self.opts.speaker,
                self.opts.model_id,
                self.opts.effective_lang()
            ),
            self.theme.header,
        ))
    }

    fn time_line(&self, elapsed: Duration) -> Line<'static> {
        let text = if self.audio_dur.is_zero() {
            format!("[{}]", format_duration(elapsed))
        } else {
            format!(
                "[{} / {}]",
                format_duration(elapsed),
                format_duration(self.audio_dur)
            )
        };
        Line::from(Span::styled(text, self.theme.dim))
    }

    pub fn view(&mut self) -> Vec<Line<'static>> {
        let mut lines = Vec::new();
        match self.state {
            TtsState::Connecting => {
                lines.push(Line::from(format!(
                    "{} Connecting...",
                    SPINNER[self.frame % SPINNER.len()]
                )));
            }
            TtsState::Playing => {
                let elapsed = self
                    .play_start
                    .map(|s| s.elapsed())
                    .unwrap_or(Duration::ZERO);
                lines.push(self.separator());
                lines.push(self.header());
                lines.extend(self.transcript.render(&self.theme));
                lines.push(self.time_line(elapsed));
                lines.push(self.waveform.render_top(&self.theme));
                lines.push(self.waveform.render_bot(&self.theme));
                lines.push(Line::default());
                lines.push(self.separator());
            }
            TtsState::Done => {
                lines.push(self.separator());
                lines.push(self.header());
                lines.extend(self.transcript.render(&self.theme));
                lines.push(self.time_line(self.audio_dur));
                lines.push(self.waveform.render_top(&self.theme));
                lines.push(self.waveform.render_bot(&self.theme));
                lines.push(Line::default());
                lines.push(self.separator());
                if let Some(path) = &self.saved_to {
                    lines.push(Line::from(Span::styled(
                        format!("Audio saved to {path}"),
                        self.theme.success,
                    )));
                }
                if let Some(err) = &self.save_error {
                    lines.push(Line::from(err.clone()));
                }
                lines.push(Line::from(Span::styled(
                    format!(
                        "TTFB: {}ms | Duration: {} | Size: {}",
                        self.ttfb.as_millis(),
                        format_duration(self.audio_dur),
                        format_bytes(self.audio_size)
                    ),
                    self.theme.dim,
                )));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures;
    use crate::metadata::parsed_comment_from_file;

    fn opts() -> TtsOptions {
        TtsOptions {
            speaker: "celeste".into(),
            model_id: "arcana".into(),
            ..TtsOptions::default()
        }
    }

    fn started(app: &mut TtsApp, rate: u32) -> Arc<AmplitudeCell> {
        let cell = Arc::new(AmplitudeCell::new());
        app.on_started(
            SessionStart {
                format: AudioFormat {
                    sample_rate: rate,
                    channels: 1,
                    precision: 2,
                },
                amplitude: Arc::clone(&cell),
            },
            Duration::from_millis(120),
            Some("audio/wav".into()),
        );
        cell
    }

    #[test]
    fn test_scale_live_amplitude() {
        assert_eq!(scale_live_amplitude(0.0), 0.0);
        assert!((scale_live_amplitude(0.005) - 0.025).abs() < 1e-6); // negligible, no floor
        assert_eq!(scale_live_amplitude(0.02), 0.2); // floored
        assert_eq!(scale_live_amplitude(0.5), 1.0); // clamped
    }

    #[test]
    fn test_samples_per_second_adapts_to_duration() {
        assert_eq!(samples_per_second_for(80, Duration::ZERO), 20);
        assert_eq!(samples_per_second_for(80, Duration::from_secs(4)), 40);
        // Long audio still yields at least one sample per second.
        assert_eq!(samples_per_second_for(80, Duration::from_secs(1000)), 1);
    }

    #[test]
    fn test_tick_feeds_live_waveform_from_cell() {
        let mut app = TtsApp::new("hello world", opts(), None, 80);
        let cell = started(&mut app, 8000);
        assert_eq!(app.state, TtsState::Playing);

        cell.store(0.1);
        app.on_tick();
        app.on_tick();
        assert_eq!(app.waveform.sample_count(), 2);
    }

    #[test]
    fn test_complete_pins_transcript_and_waveform() {
        let mut app = TtsApp::new("hello world", opts(), None, 80);
        started(&mut app, 8000);

        let audio = fixtures::silent_wav(8000); // one second
        app.on_complete(StreamOutcome {
            audio,
            error: None,
        });

        assert_eq!(app.state, TtsState::Done);
        assert!((app.audio_dur.as_secs_f64() - 1.0).abs() < 1e-6);
        assert!(app.waveform.sample_count() > 0);
        assert!(!app.should_quit()); // delayed quit still pending
    }

    #[test]
    fn test_complete_with_empty_audio_still_quits() {
        let mut app = TtsApp::new("hello", opts(), None, 80);
        started(&mut app, 8000);
        app.on_complete(StreamOutcome {
            audio: Vec::new(),
            error: None,
        });
        assert_eq!(app.state, TtsState::Done);
        assert!(app.quit_at.is_some());
    }

    #[test]
    fn test_save_embeds_provenance_metadata() {
        let path = std::env::temp_dir().join("vox_tts_save_test.wav");
        let mut app = TtsApp::new("Hello world", opts(), Some(path.clone()), 80);
        started(&mut app, 8000);

        app.on_complete(StreamOutcome {
            audio: fixtures::silent_wav(8000),
            error: None,
        });
        assert!(app.saved_to.is_some());

        let saved = std::fs::read(&path).unwrap();
        let parsed = parsed_comment_from_file(&saved).unwrap();
        assert_eq!(parsed.speaker, "celeste");
        assert_eq!(parsed.model_id, "arcana");
        assert_eq!(parsed.language, "eng");
        assert_eq!(parsed.text, "Hello world");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_done_view_includes_stats() {
        let mut app = TtsApp::new("hello world", opts(), None, 80);
        started(&mut app, 8000);
        app.on_complete(StreamOutcome {
            audio: fixtures::silent_wav(8000),
            error: None,
        });

        let text: String = app
            .view()
            .iter()
            .flat_map(|l| l.spans.iter().map(|s| s.content.to_string()))
            .collect();
        assert!(text.contains("TTFB: 120ms"));
        assert!(text.contains("Duration: 0:01"));
        assert!(text.contains("celeste"));
    }

    #[test]
    fn test_plain_summary_reports_save_and_stats() {
        let path = std::env::temp_dir().join("vox_tts_plain_summary_test.wav");
        let mut app = TtsApp::new("Hello world", opts(), Some(path.clone()), 80);
        started(&mut app, 8000);
        app.on_complete(StreamOutcome {
            audio: fixtures::silent_wav(8000),
            error: None,
        });

        let summary = app.plain_summary().join("\n");
        assert!(summary.contains("Audio saved to"));
        assert!(summary.contains("TTFB: 120ms"));
        assert!(summary.contains("Duration: 0:01"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_connecting_view_shows_spinner() {
        let mut app = TtsApp::new("hello", opts(), None, 80);
        let text: String = app
            .view()
            .iter()
            .flat_map(|l| l.spans.iter().map(|s| s.content.to_string()))
            .collect();
        assert!(text.contains("Connecting"));
    }
}
