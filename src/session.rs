//! Streaming playback session.
//!
//! A session owns the full byte-to-speaker path on a blocking worker: bytes
//! are teed into an accumulation buffer on their way into the decoder, the
//! decoder feeds the amplitude analyzer, and the analyzer feeds the audio
//! device. The UI talks to the worker through two oneshot channels (started,
//! done) and a shared cancel flag; the latest amplitude travels through the
//! analyzer's atomic cell.
//!
//! Close discipline: the byte source and decoder are closed exactly once, on
//! whichever path ends the session first (exhaustion, error, or cancel).

use crate::audio::analyze::{AmplitudeAnalyzer, AmplitudeCell};
use crate::audio::decode::{open_decoder, AudioError, ByteSource, SampleStreamer};
use crate::audio::{sniff_format, AudioFormat, SniffedFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const PUMP_FRAMES: usize = 512;

/// Everything the UI needs once the stream header has been decoded.
pub struct SessionStart {
    pub format: AudioFormat,
    pub amplitude: Arc<AmplitudeCell>,
}

/// Terminal result of a session: the complete received bytes plus any decode
/// error that ended it early.
pub struct StreamOutcome {
    pub audio: Vec<u8>,
    pub error: Option<AudioError>,
}

/// Handle to a running session.
pub struct StreamSession {
    pub started: oneshot::Receiver<Result<SessionStart, AudioError>>,
    pub done: oneshot::Receiver<StreamOutcome>,
    cancel: Arc<AtomicBool>,
}

impl StreamSession {
    /// Start decoding (and optionally playing) a byte stream on a blocking
    /// worker.
    ///
    /// `hint` comes from the transport (Content-Type); `Unknown` triggers a
    /// sniff of the first bytes, falling back to WAV.
    pub fn spawn(body: Box<dyn ByteSource>, hint: SniffedFormat, play: bool) -> Self {
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_worker = Arc::clone(&cancel);

        tokio::task::spawn_blocking(move || {
            run_worker(body, hint, play, cancel_worker, started_tx, done_tx);
        });

        Self {
            started: started_rx,
            done: done_rx,
            cancel,
        }
    }

    /// Ask the worker to stop. It closes the decoder and byte source, then
    /// resolves the done channel.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Detached cancel flag, usable after the receivers have been moved out.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }
}

/// Clonable handle that stops a running session.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

fn run_worker(
    body: Box<dyn ByteSource>,
    hint: SniffedFormat,
    play: bool,
    cancel: Arc<AtomicBool>,
    started_tx: oneshot::Sender<Result<SessionStart, AudioError>>,
    done_tx: oneshot::Sender<StreamOutcome>,
) {
    let collected: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

    let (format, source) = match hint {
        SniffedFormat::Unknown => match sniff_source(body) {
            Ok((sniffed, source)) => (sniffed, source),
            Err(e) => {
                let _ = started_tx.send(Err(e));
                return;
            }
        },
        known => (known, body),
    };
    // Servers occasionally omit the content type; WAV is the common case.
    let format = if format == SniffedFormat::Unknown {
        SniffedFormat::Wav
    } else {
        format
    };

    let tee = TeeSource::new(source, Arc::clone(&collected));
    let (decoder, audio_format) = match open_decoder(format, Box::new(tee)) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = started_tx.send(Err(e));
            return;
        }
    };
    let mut analyzer = AmplitudeAnalyzer::new(decoder);

    let mut output = if play {
        match AudioOutput::new(&audio_format) {
            Ok(output) => Some(output),
            Err(e) => {
                analyzer.close();
                let _ = started_tx.send(Err(e));
                return;
            }
        }
    } else {
        None
    };

    debug!(
        sample_rate = audio_format.sample_rate,
        channels = audio_format.channels,
        play,
        "stream session started"
    );
    let _ = started_tx.send(Ok(SessionStart {
        format: audio_format,
        amplitude: analyzer.cell(),
    }));

    let mut buf = vec![[0.0f32; 2]; PUMP_FRAMES];
    loop {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        let (n, ok) = analyzer.stream(&mut buf);
        if n > 0 {
            if let Some(output) = output.as_mut() {
                output.push(&buf[..n], &cancel);
            }
        }
        if n == 0 || !ok {
            break;
        }
    }
    let error = analyzer.last_error().cloned();
    if let Some(e) = &error {
        warn!(error = %e, "stream ended with decode error");
    }

    if error.is_none() && !cancel.load(Ordering::Acquire) {
        if let Some(output) = output.as_mut() {
            output.drain(&cancel);
        }
    }
    analyzer.close();

    let audio = match collected.lock() {
        Ok(mut buf) => std::mem::take(&mut *buf),
        Err(_) => Vec::new(),
    };
    let _ = done_tx.send(StreamOutcome { audio, error });
}

/// Peek enough bytes to classify the stream, then reattach them.
fn sniff_source(
    mut source: Box<dyn ByteSource>,
) -> Result<(SniffedFormat, Box<dyn ByteSource>), AudioError> {
    let mut head = [0u8; 12];
    let mut filled = 0;
    while filled < head.len() {
        let n = source.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let format = sniff_format(&head[..filled]);
    let chained = ChainSource {
        head: head[..filled].to_vec(),
        pos: 0,
        tail: Some(source),
    };
    Ok((format, Box::new(chained)))
}

/// Byte source that copies everything it yields into a shared buffer.
pub struct TeeSource {
    inner: Option<Box<dyn ByteSource>>,
    sink: Arc<Mutex<Vec<u8>>>,
}

impl TeeSource {
    pub fn new(inner: Box<dyn ByteSource>, sink: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            inner: Some(inner),
            sink,
        }
    }
}

impl Read for TeeSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let n = inner.read(buf)?;
        if n > 0 {
            if let Ok(mut sink) = self.sink.lock() {
                sink.extend_from_slice(&buf[..n]);
            }
        }
        Ok(n)
    }
}

impl ByteSource for TeeSource {
    fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
    }
}

/// Peeked bytes followed by the rest of the stream.
struct ChainSource {
    head: Vec<u8>,
    pos: usize,
    tail: Option<Box<dyn ByteSource>>,
}

impl Read for ChainSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos < self.head.len() {
            let n = (self.head.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.head[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        match self.tail.as_mut() {
            Some(tail) => tail.read(buf),
            None => Ok(0),
        }
    }
}

impl ByteSource for ChainSource {
    fn close(&mut self) {
        if let Some(mut tail) = self.tail.take() {
            tail.close();
        }
    }
}

/// cpal output stream fed from a shared sample queue.
///
/// The queue doubles as backpressure: the decode worker blocks once roughly
/// half a second of audio is buffered, which keeps the live amplitude cell in
/// step with what the speaker is playing.
struct AudioOutput {
    queue: Arc<Mutex<VecDeque<f32>>>,
    _stream: cpal::Stream,
    high_water: usize,
}

impl AudioOutput {
    fn new(format: &AudioFormat) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Io("no default output device".into()))?;

        let config = StreamConfig {
            channels: 2,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let queue_cb = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = match queue_cb.lock() {
                        Ok(q) => q,
                        Err(_) => return,
                    };
                    for slot in data.iter_mut() {
                        *slot = queue.pop_front().unwrap_or(0.0);
                    }
                },
                |err| {
                    warn!(error = %err, "audio output stream error");
                },
                None,
            )
            .map_err(|e| AudioError::Io(format!("failed to open audio output: {e}")))?;
        stream
            .play()
            .map_err(|e| AudioError::Io(format!("failed to start audio output: {e}")))?;

        // Half a second of interleaved stereo at the stream rate.
        let high_water = format.sample_rate as usize;

        Ok(Self {
            queue,
            _stream: stream,
            high_water,
        })
    }

    /// Enqueue frames, blocking while the queue is above the high-water mark.
    fn push(&mut self, frames: &[[f32; 2]], cancel: &AtomicBool) {
        if let Ok(mut queue) = self.queue.lock() {
            for frame in frames {
                queue.push_back(frame[0]);
                queue.push_back(frame[1]);
            }
        }
        loop {
            if cancel.load(Ordering::Acquire) {
                return;
            }
            let len = self.queue.lock().map(|q| q.len()).unwrap_or(0);
            if len <= self.high_water {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Wait for the queue to empty so the tail of the audio is heard.
    fn drain(&mut self, cancel: &AtomicBool) {
        loop {
            if cancel.load(Ordering::Acquire) {
                return;
            }
            let len = self.queue.lock().map(|q| q.len()).unwrap_or(0);
            if len == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::ReadSource;
    use crate::audio::fixtures;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    /// Counts close calls; reads from a finite buffer.
    struct CountingSource {
        inner: Cursor<Vec<u8>>,
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl Read for CountingSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.closed {
                return Ok(0);
            }
            self.inner.read(buf)
        }
    }

    impl ByteSource for CountingSource {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed = true;
        }
    }

    /// Valid WAV header followed by an endless run of silence, for cancel
    /// tests.
    struct EndlessSource {
        header: Vec<u8>,
        pos: usize,
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl EndlessSource {
        fn new(closes: Arc<AtomicUsize>) -> Self {
            let mut header = fixtures::minimal_wav();
            // Claim an enormous data chunk so the decoder keeps reading.
            let len = header.len();
            header[len - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
            Self {
                header,
                pos: 0,
                closes,
                closed: false,
            }
        }
    }

    impl Read for EndlessSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.closed {
                return Ok(0);
            }
            if self.pos < self.header.len() {
                let n = (self.header.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.header[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            // Trickle silence so the worker stays busy without spinning the
            // accumulation buffer up to gigabytes.
            std::thread::sleep(Duration::from_millis(1));
            let n = buf.len().min(64);
            buf[..n].fill(0);
            Ok(n)
        }
    }

    impl ByteSource for EndlessSource {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed = true;
        }
    }

    #[tokio::test]
    async fn test_session_collects_all_bytes_without_playback() {
        let data = fixtures::wav_16bit_mono(&[1000i16; 4800], 24000);
        let source = Box::new(ReadSource::new(Cursor::new(data.clone())));
        let session = StreamSession::spawn(source, SniffedFormat::Unknown, false);

        let start = session.started.await.unwrap().unwrap();
        assert_eq!(start.format.sample_rate, 24000);

        let outcome = session.done.await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.audio, data);
    }

    #[tokio::test]
    async fn test_session_amplitude_cell_is_written() {
        let data = fixtures::wav_16bit_mono(&[i16::MAX; 4800], 24000);
        let source = Box::new(ReadSource::new(Cursor::new(data)));
        let session = StreamSession::spawn(source, SniffedFormat::Wav, false);

        let start = session.started.await.unwrap().unwrap();
        let outcome = session.done.await.unwrap();
        assert!(outcome.error.is_none());
        assert!((start.amplitude.load() - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_session_reports_decoder_failure_on_started_channel() {
        let source = Box::new(ReadSource::new(Cursor::new(b"certainly not audio".to_vec())));
        let session = StreamSession::spawn(source, SniffedFormat::Wav, false);
        let result = session.started.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_worker_and_closes_source_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Box::new(EndlessSource::new(Arc::clone(&closes)));
        let mut session = StreamSession::spawn(source, SniffedFormat::Wav, false);

        let start = (&mut session.started).await.unwrap();
        assert!(start.is_ok());

        session.cancel();
        let outcome = session.done.await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mp3_session_closes_source_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Box::new(CountingSource {
            inner: Cursor::new(fixtures::mp3_frames(4)),
            closes: Arc::clone(&closes),
            closed: false,
        });
        let session = StreamSession::spawn(source, SniffedFormat::Mp3, false);
        session.started.await.unwrap().unwrap();
        session.done.await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_session_closes_source_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Box::new(CountingSource {
            inner: Cursor::new(fixtures::silent_wav(8000)),
            closes: Arc::clone(&closes),
            closed: false,
        });
        let session = StreamSession::spawn(source, SniffedFormat::Unknown, false);
        session.started.await.unwrap().unwrap();
        session.done.await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tee_source_copies_and_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(Mutex::new(Vec::new()));
        let inner = Box::new(CountingSource {
            inner: Cursor::new(vec![1u8, 2, 3, 4, 5]),
            closes: Arc::clone(&closes),
            closed: false,
        });
        let mut tee = TeeSource::new(inner, Arc::clone(&sink));

        let mut buf = [0u8; 3];
        assert_eq!(tee.read(&mut buf).unwrap(), 3);
        assert_eq!(tee.read(&mut buf).unwrap(), 2);
        assert_eq!(*sink.lock().unwrap(), vec![1, 2, 3, 4, 5]);

        tee.close();
        tee.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(tee.read(&mut buf).unwrap(), 0);
    }
}
