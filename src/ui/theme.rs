//! Injected styles for the player views.

use ratatui::style::{Color, Modifier, Style};

/// Styles used by the player views. Passed down rather than read from
/// globals so tests can render with a plain theme.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    /// Played portion of the waveform and revealed transcript words.
    pub bright: Style,
    /// Unplayed portion, labels, and separators.
    pub dim: Style,
    /// Speaker/model/lang header values.
    pub header: Style,
    /// Final stats line.
    pub success: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bright: Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
            dim: Style::default().fg(Color::DarkGray),
            header: Style::default().fg(Color::Blue),
            success: Style::default().fg(Color::Green),
        }
    }
}

impl Theme {
    /// A theme with no colors or modifiers, for tests that assert on text.
    #[cfg(test)]
    pub fn plain() -> Self {
        Self {
            bright: Style::default(),
            dim: Style::default(),
            header: Style::default(),
            success: Style::default(),
        }
    }
}
