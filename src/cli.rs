//! Command-line interface for ground-me.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::audio::{AudioInput, WavFileInput, SAMPLE_RATE_HZ};
use crate::config::{ServiceConfig, StressSensitivity};
use crate::export::export_image;
use crate::journal::JournalStore;
use crate::live_transcription::{GeminiLiveTransport, LiveSetup};
use crate::logging;
use crate::settings_store::{self, AppSettingsPatch};
use crate::storage::{default_data_dir, LocalStore};
use crate::terminal::Terminal;
use crate::voice_session::{CaptureState, VoiceCapture, VoiceEvent};

/// ground-me - a 5-4-3-2-1 grounding companion
#[derive(Parser, Debug)]
#[command(name = "ground-me")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Gemini API key (defaults to GEMINI_API_KEY, then API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory holding the journal, settings and runtime log
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Input microphone id (see `microphones`)
    #[arg(long, global = true)]
    pub microphone: Option<String>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk through the grounding exercise interactively
    Run,

    /// List saved sessions, newest first
    Journal,

    /// Show one saved session
    Show {
        /// Entry id
        id: String,
    },

    /// Write a saved session's image to disk
    Export {
        /// Entry id
        id: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Show or change settings
    Settings {
        /// Health data sync (also switches notifications)
        #[arg(long, value_enum)]
        health: Option<Toggle>,

        /// Stress notifications (requires health sync)
        #[arg(long, value_enum)]
        notifications: Option<Toggle>,

        /// Stress sensitivity (requires health sync)
        #[arg(long, value_parser = parse_sensitivity)]
        sensitivity: Option<StressSensitivity>,
    },

    /// Run a standalone voice capture session
    Listen {
        /// Replay a WAV file instead of the microphone
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, default_value = "30")]
        seconds: u64,
    },

    /// List input microphones
    Microphones,

    /// Show recent log lines
    Logs {
        /// Maximum number of lines to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Delete the log file
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Toggle::On
    }
}

fn parse_sensitivity(raw: &str) -> Result<StressSensitivity, String> {
    StressSensitivity::parse(raw).ok_or_else(|| format!("expected low, medium or high, got '{raw}'"))
}

impl Cli {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn execute(self) -> Result<()> {
        let store = LocalStore::new(self.data_dir());
        let mut service = ServiceConfig::from_env();
        if self.api_key.is_some() {
            service = service.with_api_key(self.api_key.clone());
        }

        match self.command.unwrap_or(Commands::Run) {
            Commands::Run => {
                let input = live_input(self.microphone.clone());
                Terminal::new(store, service, input)?.run()
            }
            Commands::Journal => list_journal(&store),
            Commands::Show { id } => show_entry(&store, &id),
            Commands::Export { id, out } => export_entry(&store, &id, out),
            Commands::Settings {
                health,
                notifications,
                sensitivity,
            } => update_settings(&store, health, notifications, sensitivity),
            Commands::Listen { wav, seconds } => {
                let input: Arc<dyn AudioInput> = match wav {
                    Some(path) => Arc::new(WavFileInput::new(path)),
                    None => live_input(self.microphone.clone()),
                };
                listen(&service, input, Duration::from_secs(seconds))
            }
            Commands::Microphones => list_microphones(),
            Commands::Logs { limit, clear } => show_logs(&logging::log_path(store.root()), limit, clear),
        }
    }
}

#[cfg(feature = "microphone")]
pub fn live_input(microphone_id: Option<String>) -> Arc<dyn AudioInput> {
    Arc::new(crate::audio::MicrophoneInput { microphone_id })
}

#[cfg(not(feature = "microphone"))]
pub fn live_input(_microphone_id: Option<String>) -> Arc<dyn AudioInput> {
    Arc::new(NoMicrophone)
}

#[cfg(not(feature = "microphone"))]
struct NoMicrophone;

#[cfg(not(feature = "microphone"))]
impl AudioInput for NoMicrophone {
    fn open(
        &self,
        _constraints: &crate::audio::CaptureConstraints,
        _frames: crate::audio::FrameSender,
    ) -> Result<Box<dyn crate::audio::InputDevice>, crate::audio::AudioError> {
        Err(crate::audio::AudioError::NoDevice)
    }
}

fn list_journal(store: &LocalStore) -> Result<()> {
    let entries = JournalStore::new(store.clone()).load();
    if entries.is_empty() {
        println!("No entries yet. Complete an exercise to see your history.");
        return Ok(());
    }

    println!("{:<38} {:<14} {:<8} {:<10} {:<5}", "ID", "DATE", "CHANGE", "MOOD", "IMAGE");
    println!("{}", "-".repeat(79));
    for entry in &entries {
        let summary = entry.summary();
        println!(
            "{:<38} {:<14} {:<8} {:<10} {:<5}",
            summary.id,
            summary.date_label,
            summary.improvement_badge.as_deref().unwrap_or("-"),
            format!("{} -> {}", summary.pre_magnitude, summary.post_magnitude),
            if summary.has_image { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn show_entry(store: &LocalStore, id: &str) -> Result<()> {
    let entry = JournalStore::new(store.clone())
        .find(id)
        .with_context(|| format!("no journal entry with id {id}"))?;
    let detail = entry.detail();

    println!("{} at {}", detail.date_label, detail.time_label);
    println!("Mood: {} -> {}", detail.pre_label, detail.post_label);
    for (sense, text) in &detail.senses {
        let config = sense.config();
        println!("  {} ({}): {}", config.label, config.count, text);
    }
    if detail.has_image {
        println!("Image: saved (use `ground-me export {}`)", entry.id);
    }
    Ok(())
}

fn export_entry(store: &LocalStore, id: &str, out: PathBuf) -> Result<()> {
    let entry = JournalStore::new(store.clone())
        .find(id)
        .with_context(|| format!("no journal entry with id {id}"))?;
    let Some(data_uri) = entry.image_url.as_deref() else {
        bail!("entry {id} has no image");
    };
    let path = export_image(data_uri, &out, &entry.export_file_name())
        .with_context(|| format!("failed to export image for {id}"))?;
    println!("Saved {}", path.display());
    Ok(())
}

fn update_settings(
    store: &LocalStore,
    health: Option<Toggle>,
    notifications: Option<Toggle>,
    sensitivity: Option<StressSensitivity>,
) -> Result<()> {
    let current = settings_store::load_or_default(store);
    let patch = AppSettingsPatch {
        health_sync_enabled: health.map(Toggle::enabled),
        notifications_enabled: notifications.map(Toggle::enabled),
        stress_sensitivity: sensitivity,
    };
    let touched = patch != AppSettingsPatch::default();
    let updated = settings_store::apply_patch(&current, patch);

    if touched && !updated.health_sync_enabled && (notifications.is_some() || sensitivity.is_some()) {
        eprintln!("Notifications and sensitivity can only be changed while health sync is on.");
    }
    if updated != current {
        settings_store::save(store, &updated).context("failed to save settings")?;
    }

    let on_off = |value: bool| if value { "on" } else { "off" };
    println!("Health sync:    {}", on_off(updated.health_sync_enabled));
    println!("Notifications:  {}", on_off(updated.notifications_enabled));
    println!(
        "Sensitivity:    {} ({})",
        updated.stress_sensitivity.as_str(),
        updated.stress_sensitivity.description()
    );
    Ok(())
}

fn listen(service: &ServiceConfig, input: Arc<dyn AudioInput>, limit: Duration) -> Result<()> {
    let (tx, rx) = channel();
    let mut capture = VoiceCapture::new(
        service.api_key.clone(),
        LiveSetup::transcription(service.live_model.clone(), SAMPLE_RATE_HZ),
        input,
        Arc::new(GeminiLiveTransport::new(service)),
        Arc::new(tx),
    );
    capture.start().context("voice capture could not start")?;

    let deadline = Instant::now() + limit;
    let mut was_active = false;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(VoiceEvent::State(state)) => {
                eprintln!("[{state:?}]");
                match state {
                    CaptureState::Idle if was_active => break,
                    CaptureState::Idle => {}
                    _ => was_active = true,
                }
            }
            Ok(VoiceEvent::Transcript(text)) => println!("{text}"),
            Ok(VoiceEvent::Alert(message)) => eprintln!("{message}"),
            Ok(VoiceEvent::Volume(_)) => {}
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    capture.stop();
    println!("\nFinal transcript: {}", capture.transcript());
    Ok(())
}

#[cfg(feature = "microphone")]
fn list_microphones() -> Result<()> {
    let microphones = crate::audio::list_input_microphones().context("failed to list microphones")?;
    if microphones.is_empty() {
        println!("No input microphones found");
        return Ok(());
    }
    for microphone in microphones {
        let marker = if microphone.is_default { " (default)" } else { "" };
        println!("{:>3}  {}{}", microphone.id, microphone.label, marker);
    }
    Ok(())
}

#[cfg(not(feature = "microphone"))]
fn list_microphones() -> Result<()> {
    bail!("this build has no microphone support")
}

fn show_logs(path: &Path, limit: usize, clear: bool) -> Result<()> {
    if clear {
        logging::clear(path).context("failed to clear logs")?;
        println!("Cleared {}", path.display());
        return Ok(());
    }
    for line in logging::read_recent(path, limit).context("failed to read logs")? {
        println!("{line}");
    }
    Ok(())
}
