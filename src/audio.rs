//! Audio pipeline: format detection, streaming PCM decode, amplitude analysis.
//!
//! Everything downstream of decoding is format-agnostic: both the WAV and MP3
//! decoders produce normalized stereo frames through the same
//! [`decode::SampleStreamer`] interface, selected once per session by
//! [`sniff_format`].

pub mod analyze;
pub mod decode;
pub mod mp3;
pub mod wav;

/// One decoded stereo frame, each channel normalized to [-1.0, 1.0].
///
/// Mono sources duplicate their single channel into both slots.
pub type SampleFrame = [f32; 2];

/// PCM stream parameters, fixed once a header has been decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Channel count in the source stream (output is always stereo).
    pub channels: u16,
    /// Bytes per sample per channel (1, 2, or 3).
    pub precision: u16,
}

impl AudioFormat {
    /// Bytes consumed by one frame across all source channels.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.precision as usize
    }
}

/// Container format recognized from leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedFormat {
    Wav,
    Mp3,
    Unknown,
}

impl SniffedFormat {
    /// Map a declared MIME content type onto a format, falling back to
    /// `Unknown` for anything unrecognized.
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            "audio/wav" => SniffedFormat::Wav,
            "audio/mpeg" | "audio/mp3" => SniffedFormat::Mp3,
            _ => SniffedFormat::Unknown,
        }
    }
}

/// Classify a byte buffer by magic bytes.
///
/// Rules, in order: a leading `RIFF` is WAV; an MPEG sync word (0xFF with the
/// top three bits of the following byte set) is MP3; a leading `ID3` tag is
/// MP3; anything else is unknown.
pub fn sniff_format(data: &[u8]) -> SniffedFormat {
    if data.len() >= 4 && &data[0..4] == b"RIFF" {
        return SniffedFormat::Wav;
    }
    if data.len() >= 3 && data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
        return SniffedFormat::Mp3;
    }
    if data.len() >= 3 && &data[0..3] == b"ID3" {
        return SniffedFormat::Mp3;
    }
    SniffedFormat::Unknown
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic audio buffers shared by decode/analyze/metadata tests.

    use std::io::Cursor;

    /// Build a complete in-memory WAV file from 16-bit mono samples.
    pub fn wav_16bit_mono(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    /// One second of 16-bit mono silence.
    pub fn silent_wav(sample_rate: u32) -> Vec<u8> {
        wav_16bit_mono(&vec![0i16; sample_rate as usize], sample_rate)
    }

    /// Silent MPEG-1 Layer III frames: 128 kbps, 44.1 kHz, stereo, no CRC.
    /// 417 bytes per frame; zeroed side info decodes as silence.
    pub fn mp3_frames(count: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(count * 417);
        for _ in 0..count {
            data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            data.extend_from_slice(&[0u8; 413]);
        }
        data
    }

    /// Minimal hand-built 44-byte WAV: RIFF header, fmt chunk, empty data chunk.
    pub fn minimal_wav() -> Vec<u8> {
        let mut data = Vec::with_capacity(44);
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&36u32.to_le_bytes());
        data.extend_from_slice(b"WAVE");
        data.extend_from_slice(b"fmt ");
        data.extend_from_slice(&16u32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes()); // PCM
        data.extend_from_slice(&1u16.to_le_bytes()); // mono
        data.extend_from_slice(&24000u32.to_le_bytes());
        data.extend_from_slice(&48000u32.to_le_bytes()); // byte rate
        data.extend_from_slice(&2u16.to_le_bytes()); // block align
        data.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        data.extend_from_slice(b"data");
        data.extend_from_slice(&0u32.to_le_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_riff_is_wav() {
        assert_eq!(sniff_format(b"RIFF\x24\x00\x00\x00WAVE"), SniffedFormat::Wav);
    }

    #[test]
    fn test_sniff_id3_is_mp3() {
        assert_eq!(sniff_format(b"ID3\x03\x00\x00\x00\x00\x00\x00"), SniffedFormat::Mp3);
    }

    #[test]
    fn test_sniff_mpeg_sync_word_is_mp3() {
        assert_eq!(sniff_format(&[0xFF, 0xFB, 0x90, 0x00]), SniffedFormat::Mp3);
        // Second byte must carry the full sync pattern.
        assert_eq!(sniff_format(&[0xFF, 0x1B, 0x90, 0x00]), SniffedFormat::Unknown);
    }

    #[test]
    fn test_sniff_text_is_unknown() {
        assert_eq!(sniff_format(b"hello world"), SniffedFormat::Unknown);
        assert_eq!(sniff_format(b""), SniffedFormat::Unknown);
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(SniffedFormat::from_content_type("audio/wav"), SniffedFormat::Wav);
        assert_eq!(SniffedFormat::from_content_type("audio/mpeg"), SniffedFormat::Mp3);
        assert_eq!(SniffedFormat::from_content_type("audio/mp3"), SniffedFormat::Mp3);
        assert_eq!(SniffedFormat::from_content_type("text/html"), SniffedFormat::Unknown);
    }
}
