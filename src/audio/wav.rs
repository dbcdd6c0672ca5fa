//! Streaming RIFF/WAVE PCM decoder.
//!
//! Parses the header eagerly from a byte source, then converts raw PCM to
//! normalized stereo frames one buffer at a time. Designed for network bodies:
//! no seeking, no whole-file buffering, clean handling of mid-stream EOF.

use super::decode::{AudioError, ByteSource, SampleStreamer};
use super::{AudioFormat, SampleFrame};
use std::io::{self, Read};

/// Incremental PCM WAV decoder over an unseekable byte source.
pub struct WavStreamDecoder {
    source: Option<Box<dyn ByteSource>>,
    format: AudioFormat,
    bytes_per_frame: usize,
    buf: Vec<u8>,
    err: Option<AudioError>,
}

impl std::fmt::Debug for WavStreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavStreamDecoder")
            .field("format", &self.format)
            .field("bytes_per_frame", &self.bytes_per_frame)
            .finish_non_exhaustive()
    }
}

impl WavStreamDecoder {
    /// Parse the RIFF/WAVE header and position the source at the start of the
    /// data chunk. Fails without consuming audio when the container is not a
    /// PCM WAV.
    pub fn new(mut source: Box<dyn ByteSource>) -> Result<Self, AudioError> {
        let format = read_header(&mut source)?;
        let bytes_per_frame = format.bytes_per_frame();
        Ok(Self {
            source: Some(source),
            format,
            bytes_per_frame,
            buf: vec![0u8; bytes_per_frame * 512],
            err: None,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Read as many bytes as possible up to `want`, treating EOF as a short
    /// read rather than an error.
    fn read_up_to(&mut self, want: usize) -> io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        let mut filled = 0;
        while filled < want {
            match source.read(&mut self.buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl SampleStreamer for WavStreamDecoder {
    fn stream(&mut self, frames: &mut [SampleFrame]) -> (usize, bool) {
        if self.err.is_some() {
            return (0, false);
        }

        let want = frames.len() * self.bytes_per_frame;
        if self.buf.len() < want {
            self.buf.resize(want, 0);
        }

        let filled = match self.read_up_to(want) {
            Ok(n) => n,
            Err(e) => {
                self.err = Some(AudioError::Io(e.to_string()));
                return (0, false);
            }
        };
        if filled == 0 {
            return (0, false);
        }

        // A partial trailing frame is dropped; a clean EOF is not an error.
        let count = filled / self.bytes_per_frame;
        let channels = self.format.channels as usize;

        for (i, frame) in frames.iter_mut().take(count).enumerate() {
            let offset = i * self.bytes_per_frame;
            for ch in 0..channels.min(2) {
                frame[ch] = match self.format.precision {
                    1 => self.buf[offset + ch] as f32 / 128.0 - 1.0,
                    2 => {
                        let raw = i16::from_le_bytes([
                            self.buf[offset + ch * 2],
                            self.buf[offset + ch * 2 + 1],
                        ]);
                        raw as f32 / 32768.0
                    }
                    _ => {
                        let b = &self.buf[offset + ch * 3..];
                        let raw = (b[0] as i32) | (b[1] as i32) << 8 | ((b[2] as i8) as i32) << 16;
                        raw as f32 / 8_388_608.0
                    }
                };
            }
            if channels == 1 {
                frame[1] = frame[0];
            }
        }

        // Short reads still report ok=true; the next call observes EOF and
        // returns (0, false).
        (count, true)
    }

    fn last_error(&self) -> Option<&AudioError> {
        self.err.as_ref()
    }

    fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

/// Walk chunks until the data chunk begins, extracting the fmt parameters.
fn read_header(source: &mut Box<dyn ByteSource>) -> Result<AudioFormat, AudioError> {
    let mut prefix = [0u8; 12];
    read_exact(source, &mut prefix)
        .map_err(|e| AudioError::Format(format!("failed to read RIFF header: {e}")))?;
    if &prefix[0..4] != b"RIFF" {
        return Err(AudioError::Format("not a RIFF file".into()));
    }
    if &prefix[8..12] != b"WAVE" {
        return Err(AudioError::Format("not a WAVE file".into()));
    }

    let mut format: Option<AudioFormat> = None;
    loop {
        let mut chunk_header = [0u8; 8];
        read_exact(source, &mut chunk_header)
            .map_err(|e| AudioError::TruncatedStream(format!("failed to read chunk header: {e}")))?;
        let chunk_id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
        let chunk_size =
            u32::from_le_bytes([chunk_header[4], chunk_header[5], chunk_header[6], chunk_header[7]])
                as u64;

        match &chunk_id {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(AudioError::Format("fmt chunk too small".into()));
                }
                let mut fmt_data = vec![0u8; chunk_size as usize];
                read_exact(source, &mut fmt_data)
                    .map_err(|e| AudioError::TruncatedStream(format!("failed to read fmt chunk: {e}")))?;

                let audio_format = u16::from_le_bytes([fmt_data[0], fmt_data[1]]);
                if audio_format != 1 {
                    return Err(AudioError::UnsupportedCodec(format!(
                        "audio format {audio_format} (only PCM supported)"
                    )));
                }
                let channels = u16::from_le_bytes([fmt_data[2], fmt_data[3]]);
                let sample_rate =
                    u32::from_le_bytes([fmt_data[4], fmt_data[5], fmt_data[6], fmt_data[7]]);
                let bits_per_sample = u16::from_le_bytes([fmt_data[14], fmt_data[15]]);
                if channels == 0 || sample_rate == 0 {
                    return Err(AudioError::Format("fmt chunk has zero rate or channels".into()));
                }
                if !matches!(bits_per_sample, 8 | 16 | 24) {
                    return Err(AudioError::UnsupportedCodec(format!(
                        "{bits_per_sample}-bit PCM (8, 16, or 24 supported)"
                    )));
                }
                format = Some(AudioFormat {
                    sample_rate,
                    channels,
                    precision: bits_per_sample / 8,
                });
            }
            b"data" => {
                return format.ok_or_else(|| AudioError::Format("data chunk before fmt".into()));
            }
            _ => {
                skip(source, chunk_size)
                    .map_err(|e| AudioError::TruncatedStream(format!("failed to skip chunk: {e}")))?;
            }
        }

        // Chunks are even-aligned; odd sizes carry one pad byte.
        if chunk_size % 2 != 0 {
            skip(source, 1)
                .map_err(|e| AudioError::TruncatedStream(format!("failed to skip pad byte: {e}")))?;
        }
    }
}

fn read_exact(source: &mut Box<dyn ByteSource>, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn skip(source: &mut Box<dyn ByteSource>, count: u64) -> io::Result<()> {
    let copied = io::copy(&mut source.take(count), &mut io::sink())?;
    if copied < count {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::ReadSource;
    use crate::audio::fixtures;
    use std::io::Cursor;

    fn decoder_over(data: Vec<u8>) -> Result<WavStreamDecoder, AudioError> {
        WavStreamDecoder::new(Box::new(ReadSource::new(Cursor::new(data))))
    }

    #[test]
    fn test_header_parse() {
        let decoder = decoder_over(fixtures::silent_wav(24000)).unwrap();
        let format = decoder.format();
        assert_eq!(format.sample_rate, 24000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.precision, 2);
    }

    #[test]
    fn test_rejects_non_riff() {
        let err = decoder_over(b"OggS junk that is not wav at all".to_vec()).unwrap_err();
        assert!(matches!(err, AudioError::Format(_)));
    }

    #[test]
    fn test_rejects_non_pcm() {
        let mut data = fixtures::silent_wav(24000);
        // Patch the fmt audio-format tag (offset 20 in a canonical file) to
        // IEEE float (3).
        data[20] = 3;
        let err = decoder_over(data).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedCodec(_)));
    }

    #[test]
    fn test_rejects_unsupported_bit_depth() {
        let mut data = fixtures::silent_wav(24000);
        // Patch bits-per-sample (offset 34 in a canonical file) to 32.
        data[34..36].copy_from_slice(&32u16.to_le_bytes());
        let err = decoder_over(data).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedCodec(_)));
    }

    #[test]
    fn test_streams_one_second_of_silence_exactly() {
        // Scenario: 1s of 24kHz mono 16-bit silence through a 512-frame buffer.
        let mut decoder = decoder_over(fixtures::silent_wav(24000)).unwrap();
        let mut buf = [[0.0f32; 2]; 512];
        let mut total = 0;
        loop {
            let (n, ok) = decoder.stream(&mut buf);
            if !ok {
                assert_eq!(n, 0);
                break;
            }
            total += n;
        }
        assert_eq!(total, 24000);
        assert!(decoder.last_error().is_none());
    }

    #[test]
    fn test_mono_duplicates_to_both_channels() {
        let data = fixtures::wav_16bit_mono(&[16384, -16384], 24000);
        let mut decoder = decoder_over(data).unwrap();
        let mut buf = [[0.0f32; 2]; 4];
        let (n, _) = decoder.stream(&mut buf);
        assert_eq!(n, 2);
        assert!((buf[0][0] - 0.5).abs() < 1e-4);
        assert_eq!(buf[0][0], buf[0][1]);
        assert!((buf[1][0] + 0.5).abs() < 1e-4);
        assert_eq!(buf[1][0], buf[1][1]);
    }

    #[test]
    fn test_empty_data_chunk_ends_immediately() {
        let mut decoder = decoder_over(fixtures::minimal_wav()).unwrap();
        let mut buf = [[0.0f32; 2]; 16];
        let (n, ok) = decoder.stream(&mut buf);
        assert_eq!(n, 0);
        assert!(!ok);
        assert!(decoder.last_error().is_none());
    }

    #[test]
    fn test_skips_unknown_chunks_with_pad_byte() {
        // RIFF + junk chunk with odd size + fmt + data.
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"WAVE");
        data.extend_from_slice(b"junk");
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0x00]); // 3 bytes + pad
        let canonical = fixtures::wav_16bit_mono(&[1000], 8000);
        data.extend_from_slice(&canonical[12..]); // fmt onwards
        let mut decoder = decoder_over(data).unwrap();
        let mut buf = [[0.0f32; 2]; 4];
        let (n, _) = decoder.stream(&mut buf);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_partial_trailing_frame_is_dropped() {
        let mut data = fixtures::wav_16bit_mono(&[1000, 2000], 8000);
        data.pop(); // truncate mid-frame
        let mut decoder = decoder_over(data).unwrap();
        let mut buf = [[0.0f32; 2]; 8];
        let (n, ok) = decoder.stream(&mut buf);
        assert_eq!(n, 1);
        assert!(ok);
        let (n, ok) = decoder.stream(&mut buf);
        assert_eq!(n, 0);
        assert!(!ok);
        assert!(decoder.last_error().is_none());
    }

    #[test]
    fn test_eight_bit_conversion() {
        // Hand-built 8-bit unsigned mono file with samples 0, 128, 255.
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"WAVE");
        data.extend_from_slice(b"fmt ");
        data.extend_from_slice(&16u32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&8000u32.to_le_bytes());
        data.extend_from_slice(&8000u32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(b"data");
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[0u8, 128, 255]);
        let mut decoder = decoder_over(data).unwrap();
        let mut buf = [[0.0f32; 2]; 4];
        let (n, _) = decoder.stream(&mut buf);
        assert_eq!(n, 3);
        assert!((buf[0][0] + 1.0).abs() < 1e-6);
        assert!(buf[1][0].abs() < 1e-6);
        assert!((buf[2][0] - 0.9921875).abs() < 1e-6);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut decoder = decoder_over(fixtures::silent_wav(8000)).unwrap();
        decoder.close();
        decoder.close();
        let mut buf = [[0.0f32; 2]; 4];
        let (n, ok) = decoder.stream(&mut buf);
        assert_eq!(n, 0);
        assert!(!ok);
    }
}
