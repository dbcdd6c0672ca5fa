//! Braille glyph tables for the waveform rows.
//!
//! Each braille cell packs two amplitude columns. The top row grows upward
//! from the bottom edge of the cell, the bottom row mirrors it downward, so
//! the two rows together form a vertically symmetric trace.
//!
//! Dot positions and bit values within a cell:
//!
//! ```text
//! 1 (0x01)   4 (0x08)
//! 2 (0x02)   5 (0x10)
//! 3 (0x04)   6 (0x20)
//! 7 (0x40)   8 (0x80)
//! ```
//!
//! Codepoint is U+2800 plus the bitmask.

const BRAILLE_BASE: u32 = 0x2800;

const DOT1: u32 = 0x01;
const DOT2: u32 = 0x02;
const DOT3: u32 = 0x04;
const DOT4: u32 = 0x08;
const DOT5: u32 = 0x10;
const DOT6: u32 = 0x20;
const DOT7: u32 = 0x40;
const DOT8: u32 = 0x80;

// Levels 0-4, left column growing up from the bottom (dot 7 -> 3 -> 2 -> 1).
const TOP_LEFT: [u32; 5] = [
    0,
    DOT7,
    DOT7 | DOT3,
    DOT7 | DOT3 | DOT2,
    DOT7 | DOT3 | DOT2 | DOT1,
];

const TOP_RIGHT: [u32; 5] = [
    0,
    DOT8,
    DOT8 | DOT6,
    DOT8 | DOT6 | DOT5,
    DOT8 | DOT6 | DOT5 | DOT4,
];

// Levels 0-4, left column growing down from the top (dot 1 -> 2 -> 3 -> 7).
const BOT_LEFT: [u32; 5] = [
    0,
    DOT1,
    DOT1 | DOT2,
    DOT1 | DOT2 | DOT3,
    DOT1 | DOT2 | DOT3 | DOT7,
];

const BOT_RIGHT: [u32; 5] = [
    0,
    DOT4,
    DOT4 | DOT5,
    DOT4 | DOT5 | DOT6,
    DOT4 | DOT5 | DOT6 | DOT8,
];

fn glyph(left_bits: u32, right_bits: u32) -> char {
    // The mask is at most 8 bits, so the codepoint is always valid.
    char::from_u32(BRAILLE_BASE + (left_bits | right_bits)).unwrap_or(' ')
}

/// Top-row glyph for two adjacent amplitude levels (bars grow upward).
pub fn top_char(left_level: usize, right_level: usize) -> char {
    glyph(TOP_LEFT[left_level.min(4)], TOP_RIGHT[right_level.min(4)])
}

/// Bottom-row glyph for two adjacent amplitude levels (bars grow downward).
pub fn bot_char(left_level: usize, right_level: usize) -> char {
    glyph(BOT_LEFT[left_level.min(4)], BOT_RIGHT[right_level.min(4)])
}

/// Quantize an amplitude in [0.0, 1.0] to a dot level in [0, 4].
pub fn quantize_amplitude(amp: f32) -> usize {
    if amp <= 0.0 {
        return 0;
    }
    if amp >= 1.0 {
        return 4;
    }
    (amp * 5.0) as usize
}
