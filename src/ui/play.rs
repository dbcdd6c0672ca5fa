//! Saved-file playback orchestrator.
//!
//! The file is fully loaded up front, so the definitive waveform and the
//! transcript (recovered from embedded metadata) are available before the
//! first audio frame; playback only moves the playhead.

use super::format::format_duration;
use super::theme::Theme;
use super::transcript::Transcript;
use super::waveform::Waveform;
use crate::audio::analyze::{analyze_amplitudes, mp3_duration, scale_amplitudes, wav_duration};
use crate::audio::{sniff_format, SniffedFormat};
use crate::metadata::{parsed_comment_from_file, ParsedComment, ARTIST};
use ratatui::text::{Line, Span};
use std::time::{Duration, Instant};
use tracing::warn;

const QUIT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Done,
}

pub struct PlayApp {
    file_name: String,
    theme: Theme,
    term_width: u16,

    pub state: PlayState,
    play_start: Instant,
    audio_dur: Duration,

    waveform: Waveform,
    transcript: Option<Transcript>,
    comment: Option<ParsedComment>,
    quit_at: Option<Instant>,
}

impl PlayApp {
    /// Build the player from loaded file bytes: recover the transcript from
    /// metadata, compute the duration, and run the batch amplitude pass.
    pub fn new(file_name: &str, audio: &[u8], term_width: u16) -> Self {
        let comment = parsed_comment_from_file(audio);

        let audio_dur = match sniff_format(audio) {
            SniffedFormat::Mp3 => mp3_duration(audio),
            _ => wav_duration(audio),
        };

        let transcript = comment
            .as_ref()
            .map(|c| Transcript::new(&c.text, audio_dur, term_width));

        let mut waveform = Waveform::new(term_width);
        let sps = if audio_dur.is_zero() {
            20
        } else {
            (((term_width as f64 * 2.0) / audio_dur.as_secs_f64()) as u32).max(1)
        };
        match analyze_amplitudes(audio, sps) {
            Ok(amps) => waveform.set_samples(scale_amplitudes(&amps, 5.0, 0.2)),
            Err(e) => warn!(error = %e, "amplitude analysis failed"),
        }

        Self {
            file_name: file_name.to_string(),
            theme: Theme::default(),
            term_width,
            state: PlayState::Playing,
            play_start: Instant::now(),
            audio_dur,
            waveform,
            transcript,
            comment,
            quit_at: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.audio_dur
    }

    /// Reset the elapsed clock to the moment audio actually starts.
    pub fn mark_started(&mut self) {
        self.play_start = Instant::now();
    }

    pub fn viewport_height(&self) -> u16 {
        let transcript_lines = self
            .transcript
            .as_ref()
            .map(|t| t.line_count())
            .unwrap_or(0);
        (transcript_lines + 8).min(u16::MAX as usize) as u16
    }

    pub fn on_tick(&mut self) {
        if self.state == PlayState::Playing {
            let elapsed = self.play_start.elapsed();
            if !self.audio_dur.is_zero() {
                self.waveform
                    .set_progress((elapsed.as_secs_f64() / self.audio_dur.as_secs_f64()) as f32);
            }
            if let Some(transcript) = &mut self.transcript {
                transcript.set_elapsed(elapsed);
            }
        }
    }

    pub fn on_complete(&mut self) {
        self.state = PlayState::Done;
        self.waveform.set_progress(1.0);
        if let Some(transcript) = &mut self.transcript {
            transcript.set_elapsed(self.audio_dur);
        }
        self.quit_at = Some(Instant::now() + QUIT_DELAY);
    }

    pub fn should_quit(&self) -> bool {
        self.state == PlayState::Done
            && self
                .quit_at
                .map(|at| Instant::now() >= at)
                .unwrap_or(true)
    }

    fn separator(&self) -> Line<'static> {
        Line::from(Span::styled(
            "─".repeat(self.term_width as usize),
            self.theme.dim,
        ))
    }

    fn header(&self) -> Line<'static> {
        let text = match &self.comment {
            Some(c) => format!("{ARTIST} [{}-{}-{}]", c.speaker, c.model_id, c.language),
            None => self.file_name.clone(),
        };
        Line::from(Span::styled(text, self.theme.header))
    }

    pub fn view(&mut self) -> Vec<Line<'static>> {
        let elapsed = match self.state {
            PlayState::Playing => self.play_start.elapsed(),
            PlayState::Done => self.audio_dur,
        };

        let mut lines = Vec::new();
        lines.push(self.separator());
        lines.push(self.header());
        if let Some(transcript) = &mut self.transcript {
            lines.extend(transcript.render(&self.theme));
        }
        lines.push(Line::from(Span::styled(
            format!(
                "[{} / {}]",
                format_duration(elapsed),
                format_duration(self.audio_dur)
            ),
            self.theme.dim,
        )));
        lines.push(self.waveform.render_top(&self.theme));
        lines.push(self.waveform.render_bot(&self.theme));
        lines.push(Line::default());
        lines.push(self.separator());
        lines
    }
}
