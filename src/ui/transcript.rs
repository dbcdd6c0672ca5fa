//! Word-by-word transcript reveal synchronized to playback.
//!
//! The reveal count is `floor(words * elapsed / duration)`: revealed words
//! render bright, the rest dim. Words are greedily wrapped to the text width.

use super::theme::Theme;
use ratatui::text::{Line, Span};
use std::time::Duration;

const WORDS_PER_MINUTE: f64 = 150.0;
const MIN_TEXT_WIDTH: usize = 20;
const MAX_TEXT_WIDTH: usize = 80;

pub struct Transcript {
    words: Vec<String>,
    duration: Duration,
    elapsed: Duration,
    max_width: usize,

    cached_output: Option<Vec<Line<'static>>>,
    cached_reveal_count: Option<usize>,
}

impl Transcript {
    pub fn new(text: &str, duration: Duration, terminal_width: u16) -> Self {
        let width = terminal_width as usize;
        let max_width = if width < MIN_TEXT_WIDTH {
            MAX_TEXT_WIDTH
        } else {
            width.min(MAX_TEXT_WIDTH)
        };
        Self {
            words: text.split_whitespace().map(str::to_string).collect(),
            duration,
            elapsed: Duration::ZERO,
            max_width,
            cached_output: None,
            cached_reveal_count: None,
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Replace the reveal timebase, e.g. once the true audio duration is
    /// known.
    pub fn set_duration(&mut self, duration: Duration) {
        if self.duration != duration {
            self.duration = duration;
            self.cached_output = None;
            self.cached_reveal_count = None;
        }
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    /// Number of lines the transcript occupies at the current width, for
    /// sizing the inline viewport.
    pub fn line_count(&self) -> usize {
        if self.words.is_empty() {
            return 0;
        }
        let mut lines = 1;
        let mut line_len = 0;
        for word in &self.words {
            let space = if line_len > 0 { 1 } else { 0 };
            if line_len + space + word.len() > self.max_width && line_len > 0 {
                lines += 1;
                line_len = word.len();
            } else {
                line_len += space + word.len();
            }
        }
        lines
    }

    pub fn render(&mut self, theme: &Theme) -> Vec<Line<'static>> {
        if self.words.is_empty() {
            return Vec::new();
        }

        let mut reveal_count = self.words.len();
        if !self.duration.is_zero() {
            let progress = (self.elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0);
            reveal_count = ((self.words.len() as f64) * progress) as usize;
            reveal_count = reveal_count.min(self.words.len());
        }

        if let (Some(output), Some(cached)) = (&self.cached_output, self.cached_reveal_count) {
            if cached == reveal_count {
                return output.clone();
            }
        }

        let output = self.wrap_words(reveal_count, theme);
        self.cached_output = Some(output.clone());
        self.cached_reveal_count = Some(reveal_count);
        output
    }

    fn wrap_words(&self, reveal_count: usize, theme: &Theme) -> Vec<Line<'static>> {
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut spans: Vec<Span<'static>> = Vec::new();
        let mut bright_chunk = String::new();
        let mut dim_chunk = String::new();
        let mut line_len = 0;

        for (i, word) in self.words.iter().enumerate() {
            let mut needs_space =
                !spans.is_empty() || !bright_chunk.is_empty() || !dim_chunk.is_empty();
            let space_len = usize::from(needs_space);

            if line_len + space_len + word.len() > self.max_width && needs_space {
                flush(&mut spans, &mut bright_chunk, &mut dim_chunk, theme);
                lines.push(Line::from(std::mem::take(&mut spans)));
                line_len = 0;
                needs_space = false;
            }

            if i < reveal_count {
                if !dim_chunk.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut dim_chunk), theme.dim));
                }
                if needs_space {
                    bright_chunk.push(' ');
                }
                bright_chunk.push_str(word);
            } else {
                if !bright_chunk.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut bright_chunk), theme.bright));
                }
                if needs_space {
                    dim_chunk.push(' ');
                }
                dim_chunk.push_str(word);
            }
            line_len += usize::from(needs_space) + word.len();
        }

        flush(&mut spans, &mut bright_chunk, &mut dim_chunk, theme);
        if !spans.is_empty() {
            lines.push(Line::from(spans));
        }
        lines
    }
}

fn flush(
    spans: &mut Vec<Span<'static>>,
    bright_chunk: &mut String,
    dim_chunk: &mut String,
    theme: &Theme,
) {
    if !bright_chunk.is_empty() {
        spans.push(Span::styled(std::mem::take(bright_chunk), theme.bright));
    }
    if !dim_chunk.is_empty() {
        spans.push(Span::styled(std::mem::take(dim_chunk), theme.dim));
    }
}

/// Reading-speed estimate used before the true audio duration is known.
pub fn estimate_duration_from_text(text: &str) -> Duration {
    let word_count = text.split_whitespace().count();
    if word_count == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(word_count as f64 / WORDS_PER_MINUTE * 60.0)
}
