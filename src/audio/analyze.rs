//! Amplitude analysis and duration calculation.
//!
//! Two analysis modes share the same RMS math: the live analyzer wraps a
//! sample stream and publishes the most recent amplitude through an atomic
//! cell for the UI tick to read, while the batch pass decodes a complete
//! buffer into an amplitude series for the definitive waveform.

use super::decode::{open_decoder, AudioError, ReadSource, SampleStreamer};
use super::mp3::Mp3Decoder;
use super::{sniff_format, AudioFormat, SampleFrame, SniffedFormat};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock-free cell holding the latest instantaneous RMS amplitude.
///
/// Written by the decode worker, read by the UI tick. This is deliberately
/// the only mutable state shared between the two.
#[derive(Debug, Default)]
pub struct AmplitudeCell(AtomicU32);

impl AmplitudeCell {
    pub fn new() -> Self {
        Self(AtomicU32::new(0.0f32.to_bits()))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Pass-through sample stream that records the RMS of every buffer it
/// produces.
pub struct AmplitudeAnalyzer {
    source: Box<dyn SampleStreamer>,
    cell: Arc<AmplitudeCell>,
}

impl AmplitudeAnalyzer {
    pub fn new(source: Box<dyn SampleStreamer>) -> Self {
        Self {
            source,
            cell: Arc::new(AmplitudeCell::new()),
        }
    }

    /// Handle for reading the latest amplitude from another thread.
    pub fn cell(&self) -> Arc<AmplitudeCell> {
        Arc::clone(&self.cell)
    }
}

impl SampleStreamer for AmplitudeAnalyzer {
    fn stream(&mut self, frames: &mut [SampleFrame]) -> (usize, bool) {
        let (n, ok) = self.source.stream(frames);
        if n > 0 {
            self.cell.store(rms(&frames[..n]));
        }
        (n, ok)
    }

    fn last_error(&self) -> Option<&AudioError> {
        self.source.last_error()
    }

    fn close(&mut self) {
        self.source.close();
    }
}

/// RMS over interleaved stereo frames: `sqrt(sum(l^2 + r^2) / 2n)`.
fn rms(frames: &[SampleFrame]) -> f32 {
    if frames.is_empty() {
        return 0.0;
    }
    let sum: f32 = frames.iter().map(|f| f[0] * f[0] + f[1] * f[1]).sum();
    (sum / (frames.len() as f32 * 2.0)).sqrt()
}

/// Batch-decode a complete buffer into one RMS value per chunk of
/// `sample_rate / samples_per_second` frames.
pub fn analyze_amplitudes(data: &[u8], samples_per_second: u32) -> Result<Vec<f32>, AudioError> {
    let mut format = sniff_format(data);
    if format == SniffedFormat::Unknown {
        format = SniffedFormat::Wav;
    }
    let source = Box::new(ReadSource::new(Cursor::new(data.to_vec())));
    let (mut decoder, audio_format) = open_decoder(format, source)?;

    let chunk = (audio_format.sample_rate / samples_per_second.max(1)).max(1) as usize;
    let mut buf = vec![[0.0f32; 2]; chunk];
    let mut amplitudes = Vec::new();

    loop {
        let (n, ok) = decoder.stream(&mut buf);
        if n == 0 {
            break;
        }
        amplitudes.push(rms(&buf[..n]));
        if !ok {
            break;
        }
    }
    decoder.close();

    Ok(amplitudes)
}

/// Scale an amplitude series for display.
///
/// Values are multiplied by `scale` and clamped to 1.0. Non-negligible inputs
/// (> 0.01) that land below `min_threshold` are floored to it so quiet speech
/// stays visible; true zero stays zero.
pub fn scale_amplitudes(amplitudes: &[f32], scale: f32, min_threshold: f32) -> Vec<f32> {
    amplitudes
        .iter()
        .map(|&amp| {
            let mut scaled = amp * scale;
            if amp > 0.01 && scaled < min_threshold {
                scaled = min_threshold;
            }
            scaled.min(1.0)
        })
        .collect()
}

/// Duration of a WAV buffer using externally known stream parameters.
///
/// Walks to the data chunk (clamping declared sizes to the bytes actually
/// present) and divides by the frame rate; falls back to a whole-buffer
/// estimate when no data chunk is found.
pub fn wav_duration_with_params(data: &[u8], format: &AudioFormat) -> Duration {
    let bytes_per_frame = format.bytes_per_frame();
    if format.sample_rate == 0 || bytes_per_frame == 0 || data.len() < 44 {
        return Duration::ZERO;
    }

    if let Some((_, data_size)) = find_wav_data_chunk(data) {
        if data_size > 0 {
            return frames_duration(data_size / bytes_per_frame, format.sample_rate);
        }
    }

    frames_duration((data.len() - 44) / bytes_per_frame, format.sample_rate)
}

/// Duration of a self-describing WAV buffer (parameters from its fmt chunk).
pub fn wav_duration(data: &[u8]) -> Duration {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Duration::ZERO;
    }

    let mut format: Option<AudioFormat> = None;
    let mut data_size: Option<usize> = None;
    let mut pos = 12;
    while pos + 8 <= data.len() && (format.is_none() || data_size.is_none()) {
        let chunk_id = &data[pos..pos + 4];
        let declared =
            u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                as usize;
        let remaining = data.len() - (pos + 8);
        let chunk_size = declared.min(remaining);

        match chunk_id {
            b"fmt " if chunk_size >= 16 => {
                let fmt = &data[pos + 8..pos + 8 + chunk_size];
                if u16::from_le_bytes([fmt[0], fmt[1]]) == 1 {
                    format = Some(AudioFormat {
                        sample_rate: u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]),
                        channels: u16::from_le_bytes([fmt[2], fmt[3]]),
                        precision: u16::from_le_bytes([fmt[14], fmt[15]]) / 8,
                    });
                }
            }
            b"data" => data_size = Some(chunk_size),
            _ => {}
        }

        pos += 8 + chunk_size;
        if chunk_size % 2 != 0 {
            pos += 1;
        }
    }

    match (format, data_size) {
        (Some(format), Some(size)) if format.sample_rate > 0 && format.bytes_per_frame() > 0 => {
            frames_duration(size / format.bytes_per_frame(), format.sample_rate)
        }
        _ => Duration::ZERO,
    }
}

/// Duration of an MP3 buffer by decoding and counting frames.
pub fn mp3_duration(data: &[u8]) -> Duration {
    if data.is_empty() {
        return Duration::ZERO;
    }
    let source = Box::new(ReadSource::new(Cursor::new(data.to_vec())));
    let Ok(mut decoder) = Mp3Decoder::new(source) else {
        return Duration::ZERO;
    };
    let sample_rate = decoder.format().sample_rate;

    let mut buf = vec![[0.0f32; 2]; 1024];
    let mut total = 0usize;
    loop {
        let (n, ok) = decoder.stream(&mut buf);
        if n == 0 {
            break;
        }
        total += n;
        if !ok {
            break;
        }
    }
    decoder.close();

    frames_duration(total, sample_rate)
}

/// Locate the data chunk, returning (payload offset, clamped payload size).
fn find_wav_data_chunk(data: &[u8]) -> Option<(usize, usize)> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return None;
    }
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let declared =
            u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                as usize;
        let remaining = data.len() - (pos + 8);
        if &data[pos..pos + 4] == b"data" {
            return Some((pos + 8, declared.min(remaining)));
        }
        let chunk_size = declared.min(remaining);
        pos += 8 + chunk_size;
        if chunk_size % 2 != 0 {
            pos += 1;
        }
    }
    None
}

fn frames_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}
