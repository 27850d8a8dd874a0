//! Screen state machine.
//!
//! `transition` is pure: it takes the current context and a user action and
//! returns the next context plus the side effects the caller must run.
//! Results of effects come back in as actions (`ImageReady`).

use serde::Serialize;
use tracing::debug;

use crate::config::{AppSettings, StressSensitivity};
use crate::grounding::{GroundingData, GroundingSession};
use crate::journal::{export_file_name, JournalEntry};
use crate::mood::{self, Rgb};
use crate::settings_store::{apply_patch, with_health_sync, AppSettingsPatch};

pub const HEALTH_SYNC_PROMPT: &str = "Allow 'Ground Me' to access Health Data?\n\nWe use Heart Rate and HRV to detect stress patterns and offer timely support. Your data stays on your device.";
pub const STRESS_NOTIFICATION: &str = "High stress detected. Take a moment to ground yourself?";
pub const MOVED_TOWARDS_CALM: &str = "You moved towards calm!";

/// Post minus pre must exceed this for the result screen to celebrate.
const CALM_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    Welcome,
    Settings,
    PreCheckin,
    Exercise { step: usize },
    Generating,
    PostCheckin,
    Result,
    Journal,
    JournalDetail { entry_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Start,
    OpenSettings,
    OpenJournal,
    Back,
    SetPreMood(f64),
    Begin,
    UpdateSense(String),
    NextSense,
    ImageReady(Option<String>),
    SetPostMood(f64),
    Finish,
    Save { id: String, timestamp: i64 },
    Skip,
    ViewEntry(String),
    SetHealthSync { enabled: bool, confirmed: bool },
    SetNotifications(bool),
    SetSensitivity(StressSensitivity),
    SimulateStress,
    AcceptNotification,
    DismissNotification,
    /// `now_ms` names the file when exporting from the result screen.
    Export { now_ms: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SynthesizeImage(GroundingData),
    AppendJournal(JournalEntry),
    PersistSettings(AppSettings),
    ExportImage { data_uri: String, file_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowContext {
    pub screen: Screen,
    pub session: GroundingSession,
    pub settings: AppSettings,
    pub journal: Vec<JournalEntry>,
    pub notification_visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub context: FlowContext,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSummary {
    pub pre_label: String,
    pub post_label: String,
    pub moved_towards_calm: bool,
}

impl FlowContext {
    pub fn new(settings: AppSettings, journal: Vec<JournalEntry>) -> Self {
        Self {
            screen: Screen::Welcome,
            session: GroundingSession::default(),
            settings,
            journal,
            notification_visible: false,
        }
    }

    /// Mood tint for the check-in screens; `None` elsewhere.
    pub fn background(&self) -> Option<Rgb> {
        match self.screen {
            Screen::PreCheckin => Some(mood::background_rgb(self.session.pre_mood)),
            Screen::PostCheckin => Some(mood::background_rgb(self.session.post_mood)),
            _ => None,
        }
    }

    pub fn selected_entry(&self) -> Option<&JournalEntry> {
        match &self.screen {
            Screen::JournalDetail { entry_id } => self.journal.iter().find(|entry| &entry.id == entry_id),
            _ => None,
        }
    }

    pub fn result_summary(&self) -> ResultSummary {
        ResultSummary {
            pre_label: mood::to_label(self.session.pre_mood),
            post_label: mood::to_label(self.session.post_mood),
            moved_towards_calm: self.session.post_mood - self.session.pre_mood > CALM_THRESHOLD,
        }
    }

    pub fn stress_monitoring_active(&self) -> bool {
        self.settings.health_sync_enabled && self.settings.notifications_enabled
    }

    fn start_exercise(&mut self) {
        self.session.reset();
        self.screen = Screen::PreCheckin;
    }

    fn update_settings(&mut self, next: AppSettings, effects: &mut Vec<Effect>) {
        if next != self.settings {
            self.settings = next.clone();
            effects.push(Effect::PersistSettings(next));
        }
        if !self.stress_monitoring_active() {
            self.notification_visible = false;
        }
    }
}

pub fn transition(context: FlowContext, action: Action) -> Transition {
    let mut next = context;
    let mut effects = Vec::new();

    match (next.screen.clone(), action) {
        (Screen::Welcome, Action::Start) => next.start_exercise(),
        (Screen::Welcome, Action::OpenSettings) => next.screen = Screen::Settings,
        (Screen::Welcome, Action::OpenJournal) => next.screen = Screen::Journal,

        (Screen::Settings | Screen::Journal, Action::Back) => next.screen = Screen::Welcome,
        (Screen::JournalDetail { .. }, Action::Back) => next.screen = Screen::Journal,

        (Screen::PreCheckin, Action::SetPreMood(value)) => {
            next.session.pre_mood = clamp_mood(value);
        }
        (Screen::PreCheckin, Action::Begin) => {
            next.session.current_step = 0;
            next.screen = Screen::Exercise { step: 0 };
        }

        (Screen::Exercise { .. }, Action::UpdateSense(text)) => next.session.update_current(text),
        (Screen::Exercise { step }, Action::NextSense) => {
            if next.session.is_last_step() {
                next.screen = Screen::Generating;
                effects.push(Effect::SynthesizeImage(next.session.data.clone()));
            } else {
                next.session.current_step = step + 1;
                next.screen = Screen::Exercise { step: step + 1 };
            }
        }

        (Screen::Generating, Action::ImageReady(image)) => {
            next.session.generated_image = image;
            next.screen = Screen::PostCheckin;
        }

        (Screen::PostCheckin, Action::SetPostMood(value)) => {
            next.session.post_mood = clamp_mood(value);
        }
        (Screen::PostCheckin, Action::Finish) => next.screen = Screen::Result,

        (Screen::Result, Action::Save { id, timestamp }) => {
            let entry = JournalEntry::from_session(&next.session, id, timestamp);
            next.journal.insert(0, entry.clone());
            effects.push(Effect::AppendJournal(entry));
            next.screen = Screen::Welcome;
        }
        (Screen::Result, Action::Skip) => next.screen = Screen::Welcome,
        (Screen::Result, Action::Export { now_ms }) => {
            if let Some(data_uri) = next.session.generated_image.clone() {
                effects.push(Effect::ExportImage {
                    data_uri,
                    file_name: export_file_name(now_ms),
                });
            }
        }

        (Screen::Journal, Action::ViewEntry(entry_id)) => {
            if next.journal.iter().any(|entry| entry.id == entry_id) {
                next.screen = Screen::JournalDetail { entry_id };
            }
        }
        (Screen::JournalDetail { .. }, Action::Export { .. }) => {
            if let Some(entry) = next.selected_entry() {
                if let Some(data_uri) = entry.image_url.clone() {
                    effects.push(Effect::ExportImage {
                        data_uri,
                        file_name: entry.export_file_name(),
                    });
                }
            }
        }

        (Screen::Settings, Action::SetHealthSync { enabled, confirmed }) => {
            if !enabled || confirmed {
                let updated = with_health_sync(&next.settings, enabled);
                next.update_settings(updated, &mut effects);
            }
        }
        (Screen::Settings, Action::SetNotifications(enabled)) => {
            let patch = AppSettingsPatch {
                notifications_enabled: Some(enabled),
                ..AppSettingsPatch::default()
            };
            let updated = apply_patch(&next.settings, patch);
            next.update_settings(updated, &mut effects);
        }
        (Screen::Settings, Action::SetSensitivity(level)) => {
            let patch = AppSettingsPatch {
                stress_sensitivity: Some(level),
                ..AppSettingsPatch::default()
            };
            let updated = apply_patch(&next.settings, patch);
            next.update_settings(updated, &mut effects);
        }
        (Screen::Settings, Action::SimulateStress) => {
            if next.stress_monitoring_active() {
                next.notification_visible = true;
            }
        }

        (_, Action::AcceptNotification) if next.notification_visible => {
            next.notification_visible = false;
            next.start_exercise();
        }
        (_, Action::DismissNotification) => next.notification_visible = false,

        (screen, action) => {
            debug!(?screen, ?action, "action ignored on this screen");
        }
    }

    Transition {
        context: next,
        effects,
    }
}

fn clamp_mood(value: f64) -> f64 {
    if value.is_nan() {
        mood::NEUTRAL
    } else {
        value.clamp(mood::MIN, mood::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(context: FlowContext, actions: Vec<Action>) -> (FlowContext, Vec<Effect>) {
        let mut effects = Vec::new();
        let context = actions.into_iter().fold(context, |context, action| {
            let step = transition(context, action);
            effects.extend(step.effects);
            step.context
        });
        (context, effects)
    }

    fn welcome() -> FlowContext {
        FlowContext::new(AppSettings::default(), Vec::new())
    }

    #[test]
    fn start_resets_previous_session() {
        let mut context = welcome();
        context.session.pre_mood = 10.0;
        context.session.current_step = 3;
        context.session.generated_image = Some("data:image/png;base64,AA".to_string());

        let (context, effects) = apply(context, vec![Action::Start]);
        assert_eq!(context.screen, Screen::PreCheckin);
        assert_eq!(context.session, GroundingSession::default());
        assert!(effects.is_empty());
    }

    #[test]
    fn exercise_walks_all_senses_then_requests_image() {
        let mut actions = vec![Action::Start, Action::SetPreMood(20.0), Action::Begin];
        for answer in ["lamp", "rain", "wool", "tea", "mint"] {
            actions.push(Action::UpdateSense(answer.to_string()));
            actions.push(Action::NextSense);
        }
        let (context, effects) = apply(welcome(), actions);

        assert_eq!(context.screen, Screen::Generating);
        assert_eq!(context.session.data.see, "lamp");
        assert_eq!(context.session.data.taste, "mint");
        assert_eq!(effects, vec![Effect::SynthesizeImage(context.session.data.clone())]);

        let (context, _) = apply(context, vec![Action::ImageReady(None)]);
        assert_eq!(context.screen, Screen::PostCheckin);
        assert!(context.session.generated_image.is_none());
    }

    #[test]
    fn next_moves_one_step_at_a_time() {
        let (context, _) = apply(welcome(), vec![Action::Start, Action::Begin, Action::NextSense]);
        assert_eq!(context.screen, Screen::Exercise { step: 1 });
        assert_eq!(context.session.current_step, 1);
    }

    #[test]
    fn save_prepends_entry_and_returns_home() {
        let existing = JournalEntry::from_session(&GroundingSession::default(), "old".to_string(), 1);
        let context = FlowContext::new(AppSettings::default(), vec![existing]);
        let (context, effects) = apply(
            context,
            vec![
                Action::Start,
                Action::SetPreMood(20.0),
                Action::Begin,
                Action::NextSense,
                Action::NextSense,
                Action::NextSense,
                Action::NextSense,
                Action::NextSense,
                Action::ImageReady(Some("data:image/png;base64,AA".to_string())),
                Action::SetPostMood(80.0),
                Action::Finish,
            ],
        );
        assert_eq!(context.screen, Screen::Result);
        let summary = context.result_summary();
        assert_eq!(summary.pre_label, "3 Not Good");
        assert_eq!(summary.post_label, "3 Good");
        assert!(summary.moved_towards_calm);

        let (context, save_effects) = apply(
            context,
            vec![Action::Save {
                id: "new".to_string(),
                timestamp: 42,
            }],
        );
        assert_eq!(context.screen, Screen::Welcome);
        assert_eq!(context.journal.len(), 2);
        assert_eq!(context.journal[0].id, "new");
        assert_eq!(context.journal[0].image_url.as_deref(), Some("data:image/png;base64,AA"));
        assert!(matches!(effects.last(), Some(Effect::SynthesizeImage(_))));
        assert_eq!(save_effects, vec![Effect::AppendJournal(context.journal[0].clone())]);
    }

    #[test]
    fn small_change_is_not_celebrated() {
        let mut context = welcome();
        context.session.pre_mood = 50.0;
        context.session.post_mood = 55.0;
        assert!(!context.result_summary().moved_towards_calm);
        context.session.post_mood = 56.0;
        assert!(context.result_summary().moved_towards_calm);
    }

    #[test]
    fn skip_leaves_journal_untouched() {
        let mut context = welcome();
        context.screen = Screen::Result;
        let (context, effects) = apply(context, vec![Action::Skip]);
        assert_eq!(context.screen, Screen::Welcome);
        assert!(context.journal.is_empty());
        assert!(effects.is_empty());
    }

    #[test]
    fn health_sync_requires_confirmation() {
        let (context, effects) = apply(
            welcome(),
            vec![
                Action::OpenSettings,
                Action::SetHealthSync {
                    enabled: true,
                    confirmed: false,
                },
            ],
        );
        assert!(!context.settings.health_sync_enabled);
        assert!(effects.is_empty());

        let (context, effects) = apply(
            context,
            vec![Action::SetHealthSync {
                enabled: true,
                confirmed: true,
            }],
        );
        assert!(context.settings.health_sync_enabled);
        assert!(context.settings.notifications_enabled);
        assert_eq!(effects, vec![Effect::PersistSettings(context.settings.clone())]);
    }

    #[test]
    fn notifications_and_sensitivity_locked_without_health_sync() {
        let (context, effects) = apply(
            welcome(),
            vec![
                Action::OpenSettings,
                Action::SetNotifications(true),
                Action::SetSensitivity(StressSensitivity::High),
            ],
        );
        assert_eq!(context.settings, AppSettings::default());
        assert!(effects.is_empty());
    }

    #[test]
    fn disabling_health_sync_turns_everything_off_and_hides_notification() {
        let mut context = welcome();
        context.screen = Screen::Settings;
        context.settings = with_health_sync(&AppSettings::default(), true);
        let (context, _) = apply(context, vec![Action::SimulateStress]);
        assert!(context.notification_visible);

        let (context, effects) = apply(
            context,
            vec![Action::SetHealthSync {
                enabled: false,
                confirmed: false,
            }],
        );
        assert!(!context.settings.health_sync_enabled);
        assert!(!context.settings.notifications_enabled);
        assert!(!context.notification_visible);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn stress_simulation_needs_monitoring_and_accept_starts_exercise() {
        let (context, _) = apply(welcome(), vec![Action::OpenSettings, Action::SimulateStress]);
        assert!(!context.notification_visible);

        let mut context = context;
        context.settings = with_health_sync(&context.settings, true);
        let (context, _) = apply(context, vec![Action::SimulateStress, Action::AcceptNotification]);
        assert!(!context.notification_visible);
        assert_eq!(context.screen, Screen::PreCheckin);
    }

    #[test]
    fn background_only_on_checkin_screens() {
        let (context, _) = apply(welcome(), vec![Action::Start, Action::SetPreMood(0.0)]);
        assert_eq!(context.background(), Some(Rgb::new(165, 180, 201)));

        let (context, _) = apply(context, vec![Action::Begin]);
        assert_eq!(context.background(), None);
        assert_eq!(welcome().background(), None);
    }

    #[test]
    fn mood_input_is_clamped() {
        let (context, _) = apply(welcome(), vec![Action::Start, Action::SetPreMood(140.0)]);
        assert_eq!(context.session.pre_mood, 100.0);
        let (context, _) = apply(context, vec![Action::SetPreMood(f64::NAN)]);
        assert_eq!(context.session.pre_mood, 50.0);
    }

    #[test]
    fn journal_detail_exports_with_entry_timestamp() {
        let mut session = GroundingSession::default();
        session.generated_image = Some("data:image/png;base64,AA".to_string());
        let with_image = JournalEntry::from_session(&session, "a".to_string(), 1_700_000_000_000);
        let without_image = JournalEntry::from_session(&GroundingSession::default(), "b".to_string(), 5);
        let context = FlowContext::new(AppSettings::default(), vec![with_image, without_image]);

        let (context, effects) = apply(
            context,
            vec![
                Action::OpenJournal,
                Action::ViewEntry("a".to_string()),
                Action::Export { now_ms: 99 },
            ],
        );
        assert_eq!(
            context.screen,
            Screen::JournalDetail {
                entry_id: "a".to_string()
            }
        );
        assert_eq!(
            effects,
            vec![Effect::ExportImage {
                data_uri: "data:image/png;base64,AA".to_string(),
                file_name: "grounding-1700000000000.png".to_string(),
            }]
        );

        let (context, effects) = apply(
            context,
            vec![Action::Back, Action::ViewEntry("b".to_string()), Action::Export { now_ms: 99 }],
        );
        assert!(effects.is_empty());
        let (context, _) = apply(context, vec![Action::Back, Action::Back]);
        assert_eq!(context.screen, Screen::Welcome);
    }

    #[test]
    fn unknown_entry_keeps_journal_list() {
        let (context, _) = apply(welcome(), vec![Action::OpenJournal, Action::ViewEntry("missing".to_string())]);
        assert_eq!(context.screen, Screen::Journal);
    }

    #[test]
    fn actions_on_wrong_screen_are_ignored() {
        let (context, effects) = apply(welcome(), vec![Action::NextSense, Action::Finish, Action::Begin]);
        assert_eq!(context, welcome());
        assert!(effects.is_empty());
    }
}
