//! Line-oriented front end for the screen flow.
//!
//! Stdin lines and voice capture events are merged onto one channel so the
//! main loop stays single-threaded. Each exercise step gets its own
//! `VoiceCapture`; the previous one is torn down before the next is created.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::app::{App, Notice};
use crate::audio::{AudioInput, SAMPLE_RATE_HZ};
use crate::config::{ServiceConfig, StressSensitivity};
use crate::flow::{Action, Screen, HEALTH_SYNC_PROMPT, MOVED_TOWARDS_CALM, STRESS_NOTIFICATION};
use crate::grounding::{SenseType, SENSE_ORDER};
use crate::image_synthesis::GeminiImageClient;
use crate::live_transcription::{GeminiLiveTransport, LiveSetup, TranscriptionTransport};
use crate::mood;
use crate::storage::LocalStore;
use crate::voice_session::{CaptureState, VoiceCapture, VoiceError, VoiceEvent, VoiceListener};

enum TerminalInput {
    Line(String),
    Voice { generation: u64, event: VoiceEvent },
    Closed,
}

struct VoiceForwarder {
    generation: u64,
    tx: Sender<TerminalInput>,
}

impl VoiceListener for VoiceForwarder {
    fn on_event(&self, event: VoiceEvent) {
        let _ = self.tx.send(TerminalInput::Voice {
            generation: self.generation,
            event,
        });
    }
}

struct StepCapture {
    step: usize,
    generation: u64,
    capture: VoiceCapture,
}

pub struct Terminal {
    app: App,
    service: ServiceConfig,
    input: Arc<dyn AudioInput>,
    transport: Arc<dyn TranscriptionTransport>,
    tx: Sender<TerminalInput>,
    rx: Receiver<TerminalInput>,
    capture: Option<StepCapture>,
    generation: u64,
    awaiting_health_confirmation: bool,
}

impl Terminal {
    pub fn new(store: LocalStore, service: ServiceConfig, input: Arc<dyn AudioInput>) -> Result<Self> {
        let synthesizer = GeminiImageClient::new(&service).context("failed to build image client")?;
        let transport = Arc::new(GeminiLiveTransport::new(&service));
        let (tx, rx) = channel();
        Ok(Self {
            app: App::open(store, Box::new(synthesizer), PathBuf::from(".")),
            service,
            input,
            transport,
            tx,
            rx,
            capture: None,
            generation: 0,
            awaiting_health_confirmation: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let stdin_tx = self.tx.clone();
        std::thread::Builder::new()
            .name("stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if stdin_tx.send(TerminalInput::Line(line)).is_err() {
                        return;
                    }
                }
                let _ = stdin_tx.send(TerminalInput::Closed);
            })
            .context("failed to spawn stdin reader")?;

        info!("terminal session started");
        self.render();
        while let Ok(input) = self.rx.recv() {
            match input {
                TerminalInput::Line(line) => {
                    if !self.handle_line(line.trim()) {
                        break;
                    }
                    self.sync_capture();
                    self.render();
                }
                TerminalInput::Voice { generation, event } => self.handle_voice(generation, event),
                TerminalInput::Closed => break,
            }
        }

        self.capture = None;
        info!("terminal session ended");
        Ok(())
    }

    fn dispatch(&mut self, action: Action) {
        for notice in self.app.dispatch(action) {
            print_notice(&notice);
        }
    }

    /// Keeps exactly one capture alive while an exercise step is on screen.
    fn sync_capture(&mut self) {
        let wanted = match self.app.context().screen {
            Screen::Exercise { step } => Some(step),
            _ => None,
        };
        if self.capture.as_ref().map(|current| current.step) == wanted {
            return;
        }

        // Dropping stops the old session before a new one can open.
        self.capture = None;
        let Some(step) = wanted else { return };

        self.generation += 1;
        let initial = SenseType::at_step(step)
            .map(|sense| self.app.context().session.data.get(sense).to_string())
            .unwrap_or_default();
        let capture = VoiceCapture::new(
            self.service.api_key.clone(),
            LiveSetup::transcription(self.service.live_model.clone(), SAMPLE_RATE_HZ),
            Arc::clone(&self.input),
            Arc::clone(&self.transport),
            Arc::new(VoiceForwarder {
                generation: self.generation,
                tx: self.tx.clone(),
            }),
        )
        .with_transcript(initial);
        self.capture = Some(StepCapture {
            step,
            generation: self.generation,
            capture,
        });
    }

    fn handle_voice(&mut self, generation: u64, event: VoiceEvent) {
        let current = self.capture.as_ref().map(|capture| capture.generation);
        if current != Some(generation) {
            return;
        }
        match event {
            VoiceEvent::State(state) => println!("  [{}]", state_label(state)),
            VoiceEvent::Transcript(text) => {
                println!("  > {text}");
                self.dispatch(Action::UpdateSense(text));
            }
            VoiceEvent::Alert(message) => println!("  ! {message}"),
            VoiceEvent::Volume(_) => {}
        }
    }

    /// Returns `false` when the user asked to quit.
    fn handle_line(&mut self, line: &str) -> bool {
        if matches!(line, "q" | "quit" | ":quit") {
            return false;
        }
        if self.app.context().notification_visible {
            match line {
                "a" | "accept" => {
                    self.dispatch(Action::AcceptNotification);
                    return true;
                }
                "d" | "dismiss" => {
                    self.dispatch(Action::DismissNotification);
                    return true;
                }
                _ => {}
            }
        }

        match self.app.context().screen.clone() {
            Screen::Welcome => match line {
                "s" | "start" => self.dispatch(Action::Start),
                "j" | "journal" => self.dispatch(Action::OpenJournal),
                "t" | "settings" => self.dispatch(Action::OpenSettings),
                _ => unrecognised(line),
            },
            Screen::Settings => self.handle_settings(line),
            Screen::PreCheckin => match line {
                "" | "begin" => self.dispatch(Action::Begin),
                value => match value.parse::<f64>() {
                    Ok(level) => self.dispatch(Action::SetPreMood(level)),
                    Err(_) => unrecognised(line),
                },
            },
            Screen::Exercise { .. } => self.handle_exercise(line),
            Screen::Generating => {}
            Screen::PostCheckin => match line {
                "" | "finish" => self.dispatch(Action::Finish),
                value => match value.parse::<f64>() {
                    Ok(level) => self.dispatch(Action::SetPostMood(level)),
                    Err(_) => unrecognised(line),
                },
            },
            Screen::Result => match line {
                "save" => {
                    for notice in self.app.save_session() {
                        print_notice(&notice);
                    }
                }
                "skip" => self.dispatch(Action::Skip),
                "export" => {
                    for notice in self.app.export() {
                        print_notice(&notice);
                    }
                }
                _ => unrecognised(line),
            },
            Screen::Journal => match line {
                "b" | "back" => self.dispatch(Action::Back),
                selection => {
                    let by_index = selection
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| index.checked_sub(1))
                        .and_then(|index| self.app.context().journal.get(index))
                        .map(|entry| entry.id.clone());
                    let id = by_index.unwrap_or_else(|| selection.to_string());
                    self.dispatch(Action::ViewEntry(id));
                }
            },
            Screen::JournalDetail { .. } => match line {
                "b" | "back" => self.dispatch(Action::Back),
                "export" => {
                    for notice in self.app.export() {
                        print_notice(&notice);
                    }
                }
                _ => unrecognised(line),
            },
        }
        true
    }

    fn handle_settings(&mut self, line: &str) {
        if self.awaiting_health_confirmation {
            self.awaiting_health_confirmation = false;
            let confirmed = matches!(line.to_ascii_lowercase().as_str(), "y" | "yes");
            self.dispatch(Action::SetHealthSync {
                enabled: true,
                confirmed,
            });
            return;
        }

        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("health"), Some("on")) => {
                println!("{HEALTH_SYNC_PROMPT}\n[y/N]");
                self.awaiting_health_confirmation = true;
            }
            (Some("health"), Some("off")) => self.dispatch(Action::SetHealthSync {
                enabled: false,
                confirmed: false,
            }),
            (Some("notify"), Some(toggle @ ("on" | "off"))) => {
                self.dispatch(Action::SetNotifications(toggle == "on"));
            }
            (Some("sensitivity"), Some(level)) => match StressSensitivity::parse(level) {
                Some(level) => self.dispatch(Action::SetSensitivity(level)),
                None => unrecognised(line),
            },
            (Some("stress"), None) => self.dispatch(Action::SimulateStress),
            (Some("b" | "back"), None) => self.dispatch(Action::Back),
            _ => unrecognised(line),
        }
    }

    fn handle_exercise(&mut self, line: &str) {
        match line {
            ":mic" => {
                if let Some(step) = self.capture.as_mut() {
                    match step.capture.toggle() {
                        Ok(()) => {}
                        // Already surfaced through the alert event.
                        Err(VoiceError::MissingCredential) => {}
                        Err(error) => {
                            warn!(%error, "voice capture toggle failed");
                            println!("  ! {error}");
                        }
                    }
                }
            }
            ":next" => {
                self.capture = None;
                if self.app.context().session.is_last_step() {
                    println!("Breathing... creating a peaceful visualization based on your senses.");
                }
                self.dispatch(Action::NextSense);
            }
            "" => {}
            text => {
                if let Some(step) = self.capture.as_ref() {
                    step.capture.set_transcript(text);
                }
                self.dispatch(Action::UpdateSense(text.to_string()));
            }
        }
    }

    fn render(&self) {
        let context = self.app.context();
        println!();
        if context.notification_visible {
            println!("** {STRESS_NOTIFICATION} [a]ccept / [d]ismiss **");
        }

        match &context.screen {
            Screen::Welcome => {
                println!("Ground Me");
                println!("A 5-4-3-2-1 exercise to bring you back to the present.");
                println!("[s]tart  [j]ournal  se[t]tings  [q]uit");
            }
            Screen::Settings => {
                let settings = &context.settings;
                let on_off = |value: bool| if value { "on" } else { "off" };
                println!("Settings");
                println!("  Health sync:   {}", on_off(settings.health_sync_enabled));
                println!("  Notifications: {}", on_off(settings.notifications_enabled));
                println!(
                    "  Sensitivity:   {} ({})",
                    settings.stress_sensitivity.as_str(),
                    settings.stress_sensitivity.description()
                );
                print!("health on|off");
                if settings.health_sync_enabled {
                    print!("  notify on|off  sensitivity low|medium|high");
                }
                if context.stress_monitoring_active() {
                    print!("  stress");
                }
                println!("  back");
            }
            Screen::PreCheckin => {
                println!("How are you feeling right now?");
                print_mood(context.session.pre_mood, context.background());
                println!("Enter 0-100 to adjust, or an empty line to begin.");
            }
            Screen::Exercise { step } => {
                let Some(sense) = SenseType::at_step(*step) else { return };
                let config = sense.config();
                println!("Step {}/{}: {} {}", step + 1, SENSE_ORDER.len(), config.count, config.label);
                println!("{}", config.instruction);
                let answer = context.session.data.get(sense);
                if answer.is_empty() {
                    println!("  ({})", sense.placeholder());
                } else {
                    println!("  {answer}");
                }
                let listening = self
                    .capture
                    .as_ref()
                    .map(|step| step.capture.state() != CaptureState::Idle)
                    .unwrap_or(false);
                println!(
                    ":mic {}  :next  or type your answer",
                    if listening { "(stop)" } else { "(speak)" }
                );
            }
            Screen::Generating => println!("Breathing..."),
            Screen::PostCheckin => {
                println!("All Done. How do you feel now?");
                if context.session.generated_image.is_some() {
                    println!("  Your calm image is ready.");
                }
                print_mood(context.session.post_mood, context.background());
                println!("Enter 0-100 to adjust, or an empty line to finish.");
            }
            Screen::Result => {
                let summary = context.result_summary();
                println!("Before: {}   After: {}", summary.pre_label, summary.post_label);
                if summary.moved_towards_calm {
                    println!("{MOVED_TOWARDS_CALM}");
                }
                if context.session.generated_image.is_some() {
                    println!("save  skip  export");
                } else {
                    println!("save  skip");
                }
            }
            Screen::Journal => {
                println!("Journal");
                if context.journal.is_empty() {
                    println!("  No entries yet. Complete an exercise to see your history.");
                }
                for (index, entry) in context.journal.iter().enumerate() {
                    let summary = entry.summary();
                    println!(
                        "  {:>2}. {}  {}  {} -> {}{}",
                        index + 1,
                        summary.date_label,
                        summary.improvement_badge.as_deref().unwrap_or("  "),
                        summary.pre_magnitude,
                        summary.post_magnitude,
                        if summary.has_image { "  [image]" } else { "" },
                    );
                }
                println!("number to open, back");
            }
            Screen::JournalDetail { .. } => {
                let Some(entry) = context.selected_entry() else { return };
                let detail = entry.detail();
                println!("{} at {}", detail.date_label, detail.time_label);
                println!("Mood: {} -> {}", detail.pre_label, detail.post_label);
                for (sense, text) in &detail.senses {
                    let config = sense.config();
                    println!("  {} ({}): {}", config.label, config.count, text);
                }
                if detail.has_image {
                    println!("export  back");
                } else {
                    println!("back");
                }
            }
        }
        let _ = io::stdout().flush();
    }
}

fn state_label(state: CaptureState) -> &'static str {
    match state {
        CaptureState::Idle => "mic off",
        CaptureState::Connecting => "connecting...",
        CaptureState::Listening => "listening",
    }
}

fn print_mood(value: f64, background: Option<mood::Rgb>) {
    match background {
        Some(rgb) => println!("  Mood {:.0}: {}  [{}]", value, mood::to_label(value), rgb.css()),
        None => println!("  Mood {:.0}: {}", value, mood::to_label(value)),
    }
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Exported(path) => println!("Saved image to {}", path.display()),
        Notice::ExportFailed(message) => println!("Could not export image: {message}"),
        Notice::SaveFailed(message) => println!("Could not save: {message}"),
    }
}

fn unrecognised(line: &str) {
    println!("Unrecognised command: {line}");
}
