//! CLI command implementations

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::capture::ffmpeg::ffmpeg_available;
use crate::capture::{FfmpegSinkBuilder, FfmpegStreamBuilder};
use crate::cli::args::{ConfigCommand, RecordArgs};
use crate::config::Settings;
use crate::engine::{
    format_clock, EngineServices, PermissionService, RecordingEngine, RecordingObserver,
    RecordingState,
};
use crate::services::{DirectContentSelector, SimpleDirectoryProvider, SystemPermissionService};
use crate::session::{FfmpegConcatMerger, SegmentStitcher, SessionController};
use crate::storage::{JsonRecordingStore, Recording, RecordingStore};
use crate::ScreencapError;

/// Engine notifications forwarded to the command loop
#[derive(Debug)]
enum EngineEvent {
    State(RecordingState),
    Finished(Recording),
    Failed(ScreencapError),
}

struct ChannelObserver {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl RecordingObserver for ChannelObserver {
    fn on_state_changed(&self, state: &RecordingState) {
        let _ = self.tx.send(EngineEvent::State(state.clone()));
    }

    fn on_finished(&self, recording: &Recording) {
        let _ = self.tx.send(EngineEvent::Finished(recording.clone()));
    }

    fn on_error(&self, error: &ScreencapError) {
        let _ = self.tx.send(EngineEvent::Failed(error.clone()));
    }
}

fn spawn_action<F, Fut>(engine: &RecordingEngine, action: F)
where
    F: FnOnce(RecordingEngine) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(action(engine.clone()));
}

/// Record until stopped, then print the saved file's path
pub async fn record(settings: &Settings, args: RecordArgs) -> Result<()> {
    let capture = &settings.capture;
    if !ffmpeg_available(&capture.ffmpeg_path) {
        anyhow::bail!(
            "ffmpeg not found at '{}'. Install ffmpeg or set capture.ffmpeg_path in the config.",
            capture.ffmpeg_path.display()
        );
    }
    settings.ensure_dirs()?;

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| settings.general.recordings_dir.clone());

    let controller = SessionController::new(
        Arc::new(FfmpegStreamBuilder::new(capture.clone())),
        Arc::new(FfmpegSinkBuilder),
        SegmentStitcher::new(Arc::new(FfmpegConcatMerger::new(&capture.ffmpeg_path))),
    );

    let (tx, mut events) = mpsc::unbounded_channel();
    let services = EngineServices {
        capture: Arc::new(controller),
        permissions: Arc::new(SystemPermissionService::new()),
        selector: Arc::new(DirectContentSelector::new(
            args.display_index,
            args.window_id,
            args.application.clone(),
        )),
        directory: Arc::new(SimpleDirectoryProvider::new(output_dir)),
        store: Arc::new(JsonRecordingStore::new(settings.recordings_store_path())),
        observer: Arc::new(ChannelObserver { tx }),
    };

    let engine = RecordingEngine::new(services, args.recording_settings(&settings.recording));
    engine.set_capture_source(args.source);

    spawn_action(&engine, |engine| async move { engine.start().await });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut controls_open = !args.no_input;
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut timed = args.duration > 0;
    let mut was_recording = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    anyhow::bail!("Recording engine went away");
                };
                match event {
                    EngineEvent::State(RecordingState::Countdown(remaining)) => {
                        eprintln!("Starting in {}...", remaining);
                    }
                    EngineEvent::State(RecordingState::Recording { is_paused: false }) => {
                        if !was_recording && controls_open {
                            eprintln!("Recording. [p] pause/resume  [c] cancel  [s] stop");
                        } else if !was_recording {
                            eprintln!("Recording. Press Ctrl+C to stop.");
                        } else {
                            eprintln!("Resumed at {}", engine.recording_clock());
                        }
                        was_recording = true;
                    }
                    EngineEvent::State(RecordingState::Recording { is_paused: true }) => {
                        eprintln!("Paused at {}", engine.recording_clock());
                    }
                    EngineEvent::State(RecordingState::Stopping) => {
                        eprintln!("Finishing recording...");
                    }
                    // Finished is reported before Idle, so Idle here means nothing was kept.
                    EngineEvent::State(RecordingState::Idle) if was_recording => {
                        eprintln!("Recording discarded");
                        return Ok(());
                    }
                    EngineEvent::State(RecordingState::Idle) => {
                        eprintln!("No recording was made");
                        return Ok(());
                    }
                    EngineEvent::State(_) => {}
                    EngineEvent::Finished(recording) => {
                        print_finished(&recording);
                        return Ok(());
                    }
                    EngineEvent::Failed(error) => {
                        return Err(error).context("Recording failed");
                    }
                }
            }
            line = stdin.next_line(), if controls_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "p" => spawn_action(&engine, |engine| async move { engine.pause_resume().await }),
                        "c" => spawn_action(&engine, |engine| async move { engine.cancel().await }),
                        "s" | "" => spawn_action(&engine, |engine| async move { engine.stop().await }),
                        other => eprintln!("Unknown command '{}'", other),
                    },
                    Ok(None) | Err(_) => controls_open = false,
                }
            }
            _ = &mut deadline, if timed => {
                timed = false;
                spawn_action(&engine, |engine| async move { engine.stop().await });
            }
            _ = tokio::signal::ctrl_c() => {
                if engine.state().is_recording() {
                    spawn_action(&engine, |engine| async move { engine.stop().await });
                } else {
                    spawn_action(&engine, |engine| async move { engine.cancel().await });
                }
            }
        }
    }
}

fn print_finished(recording: &Recording) {
    eprintln!(
        "Saved {} ({})",
        recording.file_name(),
        format_clock(Duration::from_secs_f64(recording.duration_secs.max(0.0)))
    );
    println!("{}", recording.path.display());
}

/// List recent recordings
pub fn list_recent(settings: &Settings, limit: usize, json: bool) -> Result<()> {
    let store = JsonRecordingStore::new(settings.recordings_store_path());
    let recordings: Vec<Recording> = store.load().into_iter().take(limit).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&recordings)?);
        return Ok(());
    }

    if recordings.is_empty() {
        println!("No recordings found");
        return Ok(());
    }

    println!(
        "{:<10} {:<40} {:<17} {:<8} {:<12}",
        "ID", "File", "Date", "Duration", "Type"
    );
    println!("{}", "-".repeat(90));

    for recording in recordings {
        let duration = format_clock(Duration::from_secs_f64(recording.duration_secs.max(0.0)));
        let date = recording.created_at.format("%Y-%m-%d %H:%M");
        println!(
            "{:<10} {:<40} {:<17} {:<8} {:<12}",
            truncate(&recording.id, 8),
            truncate(&recording.file_name(), 38),
            date,
            duration,
            recording.capture_type.display_name()
        );
    }

    Ok(())
}

#[derive(Serialize)]
struct PermissionCheck {
    name: &'static str,
    granted: bool,
    detail: &'static str,
}

/// Report which capture prerequisites are in place
pub async fn check_permissions(settings: &Settings, json: bool) -> Result<()> {
    let service = SystemPermissionService::new();

    let checks = vec![
        PermissionCheck {
            name: "screen",
            granted: service.ensure_screen_recording_access(),
            detail: "display available for screen grabbing",
        },
        PermissionCheck {
            name: "camera",
            granted: service.request_camera_access().await,
            detail: "camera device present",
        },
        PermissionCheck {
            name: "microphone",
            granted: service.request_microphone_access().await,
            detail: "audio server reachable for microphone capture",
        },
        PermissionCheck {
            name: "ffmpeg",
            granted: ffmpeg_available(&settings.capture.ffmpeg_path),
            detail: "required for capture and stitching",
        },
    ];

    if json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
        return Ok(());
    }

    for check in &checks {
        let status = if check.granted { "ok" } else { "missing" };
        println!("{:<12} {:<8} {}", check.name, status, check.detail);
    }

    Ok(())
}

pub fn config_command(settings: &Settings, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(settings)?;
            println!("{}", toml);
        }
        ConfigCommand::Path => {
            let path = Settings::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = Settings::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Settings::write_default(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
