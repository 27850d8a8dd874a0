use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AppSettings;
use crate::export::export_image;
use crate::flow::{transition, Action, Effect, FlowContext};
use crate::image_synthesis::ImageSynthesizer;
use crate::journal::{JournalEntry, JournalStore};
use crate::settings_store;
use crate::storage::LocalStore;

/// Things the user should hear about after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Exported(PathBuf),
    ExportFailed(String),
    SaveFailed(String),
}

/// Runs the screen flow against real storage and services.
pub struct App {
    context: FlowContext,
    synthesizer: Box<dyn ImageSynthesizer>,
    store: LocalStore,
    journal: JournalStore,
    export_dir: PathBuf,
}

impl App {
    /// Reads settings and journal once; both are written back on change.
    pub fn open(store: LocalStore, synthesizer: Box<dyn ImageSynthesizer>, export_dir: PathBuf) -> Self {
        let settings = settings_store::load_or_default(&store);
        let journal = JournalStore::new(store.clone());
        let entries = journal.load();
        info!(entries = entries.len(), root = %store.root().display(), "app state loaded");
        Self {
            context: FlowContext::new(settings, entries),
            synthesizer,
            store,
            journal,
            export_dir,
        }
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    /// Saves the finished session with a fresh id and the current time.
    pub fn save_session(&mut self) -> Vec<Notice> {
        self.dispatch(Action::Save {
            id: JournalEntry::new_id(),
            timestamp: now_ms(),
        })
    }

    pub fn export(&mut self) -> Vec<Notice> {
        self.dispatch(Action::Export { now_ms: now_ms() })
    }

    pub fn dispatch(&mut self, action: Action) -> Vec<Notice> {
        let mut notices = Vec::new();
        let mut queue = VecDeque::from([action]);

        while let Some(action) = queue.pop_front() {
            let current = std::mem::replace(
                &mut self.context,
                FlowContext::new(AppSettings::default(), Vec::new()),
            );
            let step = transition(current, action);
            self.context = step.context;

            for effect in step.effects {
                match effect {
                    Effect::SynthesizeImage(data) => {
                        queue.push_back(Action::ImageReady(self.synthesizer.synthesize(&data)));
                    }
                    Effect::AppendJournal(entry) => {
                        if let Err(error) = self.journal.append(entry) {
                            warn!(%error, "failed to persist journal entry");
                            notices.push(Notice::SaveFailed(error.to_string()));
                        }
                    }
                    Effect::PersistSettings(settings) => {
                        if let Err(error) = settings_store::save(&self.store, &settings) {
                            warn!(%error, "failed to persist settings");
                            notices.push(Notice::SaveFailed(error.to_string()));
                        }
                    }
                    Effect::ExportImage { data_uri, file_name } => {
                        match export_image(&data_uri, &self.export_dir, &file_name) {
                            Ok(path) => notices.push(Notice::Exported(path)),
                            Err(error) => {
                                warn!(%error, %file_name, "image export failed");
                                notices.push(Notice::ExportFailed(error.to_string()));
                            }
                        }
                    }
                }
            }
        }

        notices
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
