//! Terminal UI shell.
//!
//! The run loops own the terminal (raw mode + ratatui inline viewport) and
//! drive the orchestrators at a 50 ms tick. Keyboard input is read on a
//! blocking task and forwarded over a channel; the session worker reports
//! through its started/done oneshots. All rendering happens on this task.

pub mod braille;
pub mod format;
pub mod play;
pub mod theme;
pub mod transcript;
pub mod tts;
pub mod waveform;

use crate::api::{Client, TtsOptions};
use crate::audio::decode::ReadSource;
use crate::audio::{sniff_format, SniffedFormat};
use crate::config;
use crate::session::StreamSession;
use anyhow::{anyhow, bail, Context, Result};
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures_util::future::OptionFuture;
use play::PlayApp;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::Paragraph;
use ratatui::{Terminal, TerminalOptions, Viewport};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::debug;
use tts::TtsApp;

const TICK: Duration = Duration::from_millis(50);
const CANCEL_GRACE: Duration = Duration::from_secs(2);

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

/// Terminal width with the conventional fallback for pipes and tiny panes.
pub fn terminal_width() -> u16 {
    match crossterm::terminal::size() {
        Ok((width, _)) if width >= 40 => width,
        _ => 80,
    }
}

fn init_terminal(height: u16) -> Result<Tui> {
    enable_raw_mode()?;
    let backend = CrosstermBackend::new(io::stdout());
    let terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(height),
        },
    )?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    terminal.show_cursor()?;
    println!();
    Ok(())
}

fn spawn_input_task(tx: UnboundedSender<KeyEvent>) {
    tokio::task::spawn_blocking(move || loop {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => match event::read() {
                Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                    if tx.send(key).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
            Ok(false) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Synthesize `text`, stream it to the speaker with the live view, and save
/// it if an output path was given.
pub async fn run_tts(
    text: &str,
    opts: TtsOptions,
    output: Option<PathBuf>,
    play: bool,
) -> Result<()> {
    let api_key = config::load_api_key()?;
    let client = Client::new(api_key);

    if !io::stdout().is_terminal() {
        return run_tts_headless(&client, text, opts, output, play).await;
    }

    let width = terminal_width();
    let mut app = TtsApp::new(text, opts.clone(), output, width);

    let mut terminal = init_terminal(app.viewport_height())?;
    let result = run_tts_loop(&mut terminal, &mut app, &client, text, &opts, play).await;
    let restore = restore_terminal(&mut terminal);
    result.and(restore)
}

/// Pipe/CI path: same stream, analyze, and save pipeline, no raw mode or
/// viewport. Prints the summary lines instead of rendering them.
async fn run_tts_headless(
    client: &Client,
    text: &str,
    opts: TtsOptions,
    output: Option<PathBuf>,
    play: bool,
) -> Result<()> {
    let stream = client.stream_tts(text, &opts).await?;
    let hint = stream
        .content_type
        .as_deref()
        .map(SniffedFormat::from_content_type)
        .unwrap_or(SniffedFormat::Unknown);
    let ttfb = stream.ttfb;
    let content_type = stream.content_type;

    let mut app = TtsApp::new(text, opts, output, 80);
    let session = StreamSession::spawn(stream.body, hint, play);
    let cancel = session.cancel_handle();

    let start = session
        .started
        .await
        .map_err(|_| anyhow!("stream worker exited unexpectedly"))??;
    app.on_started(start, ttfb, content_type);

    let outcome = tokio::select! {
        res = session.done => res.map_err(|_| anyhow!("stream worker exited unexpectedly"))?,
        _ = tokio::signal::ctrl_c() => {
            debug!("cancelled by user");
            cancel.cancel();
            return Ok(());
        }
    };
    app.on_complete(outcome);

    for line in app.plain_summary() {
        println!("{line}");
    }
    Ok(())
}

async fn run_tts_loop(
    terminal: &mut Tui,
    app: &mut TtsApp,
    client: &Client,
    text: &str,
    opts: &TtsOptions,
    play: bool,
) -> Result<()> {
    let (key_tx, mut key_rx) = unbounded_channel();
    spawn_input_task(key_tx);

    // Draw the connecting state while the request is in flight.
    terminal.draw(|frame| frame.render_widget(Paragraph::new(app.view()), frame.area()))?;

    let stream = client.stream_tts(text, opts).await?;
    let hint = stream
        .content_type
        .as_deref()
        .map(SniffedFormat::from_content_type)
        .unwrap_or(SniffedFormat::Unknown);
    let ttfb = stream.ttfb;
    let content_type = stream.content_type;

    let session = StreamSession::spawn(stream.body, hint, play);
    let cancel = session.cancel_handle();
    let mut started = Some(session.started);
    let mut done = Some(session.done);

    let mut interval = tokio::time::interval(TICK);
    loop {
        terminal.draw(|frame| frame.render_widget(Paragraph::new(app.view()), frame.area()))?;
        if app.should_quit() {
            return Ok(());
        }

        tokio::select! {
            _ = interval.tick() => {
                app.on_tick();
            }
            res = OptionFuture::from(started.as_mut()), if started.is_some() => {
                started = None;
                match res {
                    Some(Ok(Ok(start))) => {
                        app.on_started(start, ttfb, content_type.clone());
                    }
                    Some(Ok(Err(e))) => return Err(e.into()),
                    _ => return Err(anyhow!("stream worker exited unexpectedly")),
                }
            }
            res = OptionFuture::from(done.as_mut()), if done.is_some() => {
                done = None;
                if let Some(Ok(outcome)) = res {
                    app.on_complete(outcome);
                }
            }
            maybe_key = key_rx.recv() => {
                if let Some(key) = maybe_key {
                    if is_ctrl_c(&key) {
                        debug!("cancelled by user");
                        cancel.cancel();
                        if let Some(done_rx) = done.take() {
                            let _ = tokio::time::timeout(CANCEL_GRACE, done_rx).await;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Play a previously saved file, recovering the transcript from its
/// embedded metadata.
pub async fn run_play(path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let format = sniff_format(&data);
    if format == SniffedFormat::Unknown {
        bail!("unsupported audio format: {}", path.display());
    }

    let file_name = path.display().to_string();
    let width = terminal_width();
    let mut app = PlayApp::new(&file_name, &data, width);

    let source = Box::new(ReadSource::new(io::Cursor::new(data)));
    let session = StreamSession::spawn(source, format, true);

    if !io::stdout().is_terminal() {
        return run_play_headless(session).await;
    }

    let mut terminal = init_terminal(app.viewport_height())?;
    let result = run_play_loop(&mut terminal, &mut app, session).await;
    let restore = restore_terminal(&mut terminal);
    result.and(restore)
}

/// Play to the device without a viewport.
async fn run_play_headless(session: StreamSession) -> Result<()> {
    let cancel = session.cancel_handle();
    session
        .started
        .await
        .map_err(|_| anyhow!("playback worker exited unexpectedly"))??;

    tokio::select! {
        res = session.done => {
            res.map_err(|_| anyhow!("playback worker exited unexpectedly"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
        }
    }
    Ok(())
}

async fn run_play_loop(terminal: &mut Tui, app: &mut PlayApp, session: StreamSession) -> Result<()> {
    let (key_tx, mut key_rx) = unbounded_channel();
    spawn_input_task(key_tx);

    let cancel = session.cancel_handle();
    let mut started = Some(session.started);
    let mut done = Some(session.done);

    let mut interval = tokio::time::interval(TICK);
    loop {
        terminal.draw(|frame| frame.render_widget(Paragraph::new(app.view()), frame.area()))?;
        if app.should_quit() {
            return Ok(());
        }

        tokio::select! {
            _ = interval.tick() => {
                app.on_tick();
            }
            res = OptionFuture::from(started.as_mut()), if started.is_some() => {
                started = None;
                match res {
                    Some(Ok(Ok(_))) => app.mark_started(),
                    Some(Ok(Err(e))) => return Err(e.into()),
                    _ => return Err(anyhow!("playback worker exited unexpectedly")),
                }
            }
            res = OptionFuture::from(done.as_mut()), if done.is_some() => {
                done = None;
                if let Some(Ok(_)) = res {
                    app.on_complete();
                }
            }
            maybe_key = key_rx.recv() => {
                if let Some(key) = maybe_key {
                    if is_ctrl_c(&key) {
                        cancel.cancel();
                        if let Some(done_rx) = done.take() {
                            let _ = tokio::time::timeout(CANCEL_GRACE, done_rx).await;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}
