//! MP3 decoding via symphonia, adapted to the [`SampleStreamer`] shape.
//!
//! The bitstream work is entirely symphonia's; this module only bridges an
//! unseekable [`ByteSource`] into a `MediaSource` and re-chunks symphonia's
//! packet-sized output into caller-sized stereo frame buffers.

use super::decode::{AudioError, ByteSource, SampleStreamer};
use super::{AudioFormat, SampleFrame};
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Byte source shared between the reader chain and the decoder handle, so the
/// decoder can still close it after the reader has been dropped.
type SharedSource = Arc<Mutex<Option<Box<dyn ByteSource>>>>;

/// Bridges a `ByteSource` into symphonia's `MediaSource`.
///
/// The mutex exists only to satisfy the `Sync` bound; a session has exactly
/// one reader. Reads after close return end-of-stream.
struct SyncSource {
    inner: SharedSource,
}

impl Read for SyncSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::other("poisoned source lock"))?;
        match guard.as_mut() {
            Some(source) => source.read(buf),
            None => Ok(0),
        }
    }
}

impl Seek for SyncSource {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::other("seek not supported on streaming source"))
    }
}

impl MediaSource for SyncSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// MP3 sample stream backed by symphonia.
pub struct Mp3Decoder {
    source: SharedSource,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    sample_buf: Option<SampleBuffer<f32>>,
    pending: VecDeque<SampleFrame>,
    eof: bool,
    err: Option<AudioError>,
}

impl Mp3Decoder {
    pub fn new(source: Box<dyn ByteSource>) -> Result<Self, AudioError> {
        let shared: SharedSource = Arc::new(Mutex::new(Some(source)));
        let media_source = SyncSource {
            inner: Arc::clone(&shared),
        };
        let mss = MediaSourceStream::new(Box::new(media_source), Default::default());

        let mut hint = Hint::new();
        hint.mime_type("audio/mpeg");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioError::Format(format!("failed to probe MP3 stream: {e}")))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Format("no audio track in MP3 stream".into()))?;
        let track_id = track.id;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Decode("MP3 stream missing sample rate".into()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedCodec(format!("MP3 codec: {e}")))?;

        Ok(Self {
            source: shared,
            reader: Some(reader),
            decoder,
            track_id,
            format: AudioFormat {
                sample_rate,
                channels,
                precision: 2,
            },
            sample_buf: None,
            pending: VecDeque::new(),
            eof: false,
            err: None,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Decode packets until at least `min` frames are pending or the stream
    /// ends.
    fn refill(&mut self, min: usize) {
        while self.pending.len() < min && !self.eof && self.err.is_none() {
            let Some(reader) = self.reader.as_mut() else {
                self.eof = true;
                return;
            };

            let packet = match reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return;
                }
                Err(e) => {
                    self.err = Some(AudioError::Decode(e.to_string()));
                    return;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Corrupt frames are skipped, not fatal.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => {
                    self.err = Some(AudioError::Decode(e.to_string()));
                    return;
                }
            };

            let spec = *decoded.spec();
            let buf = self.sample_buf.get_or_insert_with(|| {
                SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
            });
            buf.copy_interleaved_ref(decoded);

            let channels = spec.channels.count();
            for chunk in buf.samples().chunks_exact(channels.max(1)) {
                let left = chunk[0];
                let right = if channels >= 2 { chunk[1] } else { left };
                self.pending.push_back([left, right]);
            }
        }
    }
}

impl SampleStreamer for Mp3Decoder {
    fn stream(&mut self, frames: &mut [SampleFrame]) -> (usize, bool) {
        if self.err.is_some() {
            return (0, false);
        }
        self.refill(frames.len());

        let mut n = 0;
        while n < frames.len() {
            match self.pending.pop_front() {
                Some(frame) => {
                    frames[n] = frame;
                    n += 1;
                }
                None => break,
            }
        }

        if n == 0 {
            return (0, false);
        }
        (n, true)
    }

    fn last_error(&self) -> Option<&AudioError> {
        self.err.as_ref()
    }

    fn close(&mut self) {
        self.reader = None;
        if let Ok(mut guard) = self.source.lock() {
            if let Some(mut source) = guard.take() {
                source.close();
            }
        }
        self.pending.clear();
        self.eof = true;
    }
}
