//! Decoder selection and the shared sample-stream interface.
//!
//! A [`SampleStreamer`] is the one capability the rest of the pipeline sees:
//! the analyzer wraps one, the playback worker pulls from one, and the batch
//! amplitude pass drives one to exhaustion. The concrete decoder behind it is
//! chosen exactly once per session from the sniffed container format.

use super::mp3::Mp3Decoder;
use super::wav::WavStreamDecoder;
use super::{AudioFormat, SampleFrame, SniffedFormat};
use std::io::Read;
use thiserror::Error;

/// Audio pipeline error taxonomy.
#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("bad audio container: {0}")]
    Format(String),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("truncated stream: {0}")]
    TruncatedStream(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Io(err.to_string())
    }
}

/// Byte stream feeding a decoder.
///
/// `close` releases the underlying transport (network body, file handle) and
/// must be idempotent; reads after close return end-of-stream.
pub trait ByteSource: Read + Send {
    fn close(&mut self);
}

/// Plain reader adapter; closing drops the inner reader.
pub struct ReadSource<R: Read + Send> {
    inner: Option<R>,
}

impl<R: Read + Send> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<R: Read + Send> Read for ReadSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.as_mut() {
            Some(r) => r.read(buf),
            None => Ok(0),
        }
    }
}

impl<R: Read + Send> ByteSource for ReadSource<R> {
    fn close(&mut self) {
        self.inner = None;
    }
}

/// Source of normalized stereo frames.
///
/// `stream` fills a prefix of `frames` and reports `(n, ok)`: `ok == false`
/// marks either a clean end of stream or an error, distinguishable through
/// `last_error`. `close` releases the decoder and its byte source and must be
/// idempotent.
pub trait SampleStreamer: Send {
    fn stream(&mut self, frames: &mut [SampleFrame]) -> (usize, bool);
    fn last_error(&self) -> Option<&AudioError>;
    fn close(&mut self);
}

impl std::fmt::Debug for dyn SampleStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn SampleStreamer")
    }
}

/// Build the decoder matching a sniffed format.
///
/// Fails before any playback starts when the header cannot be parsed or the
/// format is unknown.
pub fn open_decoder(
    format: SniffedFormat,
    source: Box<dyn ByteSource>,
) -> Result<(Box<dyn SampleStreamer>, AudioFormat), AudioError> {
    match format {
        SniffedFormat::Wav => {
            let decoder = WavStreamDecoder::new(source)?;
            let format = decoder.format();
            Ok((Box::new(decoder), format))
        }
        SniffedFormat::Mp3 => {
            let decoder = Mp3Decoder::new(source)?;
            let format = decoder.format();
            Ok((Box::new(decoder), format))
        }
        SniffedFormat::Unknown => Err(AudioError::Format("unrecognized audio format".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures;
    use std::io::Cursor;

    #[test]
    fn test_open_decoder_selects_wav() {
        let data = fixtures::silent_wav(24000);
        let source = Box::new(ReadSource::new(Cursor::new(data)));
        let (_, format) = open_decoder(SniffedFormat::Wav, source).unwrap();
        assert_eq!(format.sample_rate, 24000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.precision, 2);
    }

    #[test]
    fn test_open_decoder_rejects_unknown() {
        let source = Box::new(ReadSource::new(Cursor::new(b"not audio".to_vec())));
        let err = open_decoder(SniffedFormat::Unknown, source).unwrap_err();
        assert!(matches!(err, AudioError::Format(_)));
    }

    #[test]
    fn test_read_source_close_is_idempotent() {
        let mut source = ReadSource::new(Cursor::new(vec![1u8, 2, 3]));
        source.close();
        source.close();
        let mut buf = [0u8; 3];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }
}
