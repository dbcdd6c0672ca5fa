//! Scrolling amplitude buffer rendered as two rows of braille glyphs.
//!
//! Each glyph column packs two samples, so the buffer holds up to twice the
//! display width in samples. A playhead splits the trace into a bright played
//! region and a dim unplayed region.

use super::braille::{bot_char, quantize_amplitude, top_char};
use super::theme::Theme;
use ratatui::text::{Line, Span};

const MIN_WIDTH: usize = 48;
const GROW_CHUNK: usize = 8;
const LOOK_AHEAD: usize = 8;

pub struct Waveform {
    samples: Vec<f32>,
    max_samples: usize,
    display_width: usize,
    /// Sample index of the current playback position.
    playhead: usize,

    cached_top: Option<Line<'static>>,
    cached_bot: Option<Line<'static>>,
    cached_playhead: usize,
    cached_sample_count: usize,
}

impl Waveform {
    /// Create a buffer sized to the terminal width (floored to a usable
    /// minimum).
    pub fn new(terminal_width: u16) -> Self {
        let width = (terminal_width as usize).max(MIN_WIDTH);
        Self {
            samples: Vec::new(),
            max_samples: width * 2,
            display_width: width,
            playhead: 0,
            cached_top: None,
            cached_bot: None,
            cached_playhead: 0,
            cached_sample_count: 0,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Replace the buffer with a pre-analyzed amplitude series and rewind the
    /// playhead. Excess samples beyond capacity are dropped from the tail.
    pub fn set_samples(&mut self, mut samples: Vec<f32>) {
        samples.truncate(self.max_samples);
        self.samples = samples;
        self.playhead = 0;
        self.invalidate_cache();

        let char_count = (self.samples.len() + 1) / 2;
        if char_count > self.display_width {
            self.display_width = char_count;
        }
    }

    /// Append a live sample, evicting the oldest once at capacity. The
    /// playhead shifts with the eviction so already-played glyphs stay
    /// played.
    pub fn add_sample(&mut self, amp: f32) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
            self.playhead = self.playhead.saturating_sub(1);
        }
        self.samples.push(amp);
        self.invalidate_cache();

        // Widen the row a chunk at a time, keeping a few blank cells of
        // runway ahead of the trace.
        let content_chars = (self.samples.len() + 1) / 2;
        let max_width = self.max_samples / 2;
        let needed_width = content_chars + (LOOK_AHEAD + 1) / 2;
        if needed_width > self.display_width && self.display_width < max_width {
            self.display_width = (self.display_width + GROW_CHUNK).min(max_width);
        }
    }

    /// Position the playhead from a progress fraction in [0.0, 1.0].
    pub fn set_progress(&mut self, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        let new_playhead = (progress * self.samples.len() as f32) as usize;
        if new_playhead != self.playhead {
            self.playhead = new_playhead;
            self.invalidate_cache();
        }
    }

    pub fn render_top(&mut self, theme: &Theme) -> Line<'static> {
        if let Some(line) = self.cached(&self.cached_top) {
            return line;
        }
        let line = self.render_row(top_char, theme);
        self.cached_top = Some(line.clone());
        self.cached_playhead = self.playhead;
        self.cached_sample_count = self.samples.len();
        line
    }

    pub fn render_bot(&mut self, theme: &Theme) -> Line<'static> {
        if let Some(line) = self.cached(&self.cached_bot) {
            return line;
        }
        let line = self.render_row(bot_char, theme);
        self.cached_bot = Some(line.clone());
        self.cached_playhead = self.playhead;
        self.cached_sample_count = self.samples.len();
        line
    }

    fn cached(&self, slot: &Option<Line<'static>>) -> Option<Line<'static>> {
        if self.cached_playhead == self.playhead && self.cached_sample_count == self.samples.len() {
            slot.clone()
        } else {
            None
        }
    }

    fn render_row(&self, char_fn: fn(usize, usize) -> char, theme: &Theme) -> Line<'static> {
        if self.samples.is_empty() {
            return Line::default();
        }

        let char_count = (self.samples.len() + 1) / 2;
        let mut spans: Vec<Span<'static>> = Vec::new();
        let mut bright_chunk = String::new();
        let mut dim_chunk = String::new();

        for i in (0..self.samples.len()).step_by(2) {
            let left = quantize_amplitude(self.samples[i]);
            let right = self
                .samples
                .get(i + 1)
                .map(|&a| quantize_amplitude(a))
                .unwrap_or(0);
            let ch = char_fn(left, right);

            if i < self.playhead {
                if !dim_chunk.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut dim_chunk), theme.dim));
                }
                bright_chunk.push(ch);
            } else {
                if !bright_chunk.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut bright_chunk), theme.bright));
                }
                dim_chunk.push(ch);
            }
        }

        if !bright_chunk.is_empty() {
            spans.push(Span::styled(bright_chunk, theme.bright));
        }
        if !dim_chunk.is_empty() {
            spans.push(Span::styled(dim_chunk, theme.dim));
        }

        if char_count < self.display_width {
            let padding = "\u{2800}".repeat(self.display_width - char_count);
            spans.push(Span::styled(padding, theme.dim));
        }

        Line::from(spans)
    }

    fn invalidate_cache(&mut self) {
        self.cached_top = None;
        self.cached_bot = None;
    }
}
