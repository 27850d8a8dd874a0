use std::cell::Cell;
use std::rc::Rc;

use ground_me::app::{App, Notice};
use ground_me::config::{AppSettings, ServiceConfig, StressSensitivity};
use ground_me::flow::{Action, Screen};
use ground_me::grounding::GroundingData;
use ground_me::image_synthesis::{GeminiImageClient, ImageSynthesizer};
use ground_me::journal::JournalStore;
use ground_me::settings_store;
use ground_me::storage::{LocalStore, JOURNAL_KEY};

struct FixedImage {
    image: Option<String>,
    calls: Rc<Cell<usize>>,
}

impl ImageSynthesizer for FixedImage {
    fn synthesize(&self, data: &GroundingData) -> Option<String> {
        assert!(!data.see.is_empty(), "synthesis should see the collected answers");
        self.calls.set(self.calls.get() + 1);
        self.image.clone()
    }
}

fn complete_exercise(app: &mut App, pre: f64, post: f64) {
    app.dispatch(Action::Start);
    app.dispatch(Action::SetPreMood(pre));
    app.dispatch(Action::Begin);
    for answer in ["lamp, mug, window, plant, book", "rain, fan, birds, clock", "blanket, desk, socks", "coffee, soap", "mint"] {
        app.dispatch(Action::UpdateSense(answer.to_string()));
        app.dispatch(Action::NextSense);
    }
    assert_eq!(app.context().screen, Screen::PostCheckin);
    app.dispatch(Action::SetPostMood(post));
    app.dispatch(Action::Finish);
    assert_eq!(app.context().screen, Screen::Result);
}

#[test]
fn failed_image_synthesis_still_saves_entry_without_image() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let store = LocalStore::new(dir.path());
    // No credential: the real client degrades to no image without touching the network.
    let client = GeminiImageClient::new(&ServiceConfig::default()).expect("client should build");
    let mut app = App::open(store.clone(), Box::new(client), dir.path().join("exports"));

    complete_exercise(&mut app, 40.0, 60.0);
    assert!(app.context().session.generated_image.is_none());

    let notices = app.save_session();
    assert!(notices.is_empty(), "save should succeed: {notices:?}");
    assert_eq!(app.context().screen, Screen::Welcome);

    let entries = JournalStore::new(store.clone()).load();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].image_url.is_none());
    assert_eq!(entries[0].data.taste, "mint");

    let raw = store
        .read(JOURNAL_KEY)
        .expect("journal should read")
        .expect("journal blob should exist");
    assert!(!raw.contains("imageUrl"));
}

#[test]
fn improvement_is_recorded_and_flagged_positive() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let store = LocalStore::new(dir.path());
    let calls = Rc::new(Cell::new(0));
    let synthesizer = FixedImage {
        image: Some("data:image/png;base64,aGVsbG8=".to_string()),
        calls: Rc::clone(&calls),
    };
    let mut app = App::open(store.clone(), Box::new(synthesizer), dir.path().join("exports"));

    complete_exercise(&mut app, 20.0, 80.0);
    assert_eq!(calls.get(), 1);
    assert!(app.context().result_summary().moved_towards_calm);
    app.save_session();

    let entries = JournalStore::new(store).load();
    let entry = &entries[0];
    assert_eq!(entry.improvement(), 60.0);
    assert!(entry.is_positive());
    assert_eq!(entry.summary().improvement_badge.as_deref(), Some("+6"));
    assert!(entry.summary().has_image);
}

#[test]
fn entries_reload_newest_first_across_restarts() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let store = LocalStore::new(dir.path());
    let synthesizer = || {
        Box::new(FixedImage {
            image: None,
            calls: Rc::new(Cell::new(0)),
        })
    };

    let mut first = App::open(store.clone(), synthesizer(), dir.path().to_path_buf());
    complete_exercise(&mut first, 50.0, 50.0);
    first.dispatch(Action::Save {
        id: "first".to_string(),
        timestamp: 1,
    });
    complete_exercise(&mut first, 30.0, 70.0);
    first.dispatch(Action::Save {
        id: "second".to_string(),
        timestamp: 2,
    });

    let reopened = App::open(store, synthesizer(), dir.path().to_path_buf());
    let ids = reopened
        .context()
        .journal
        .iter()
        .map(|entry| entry.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["second", "first"]);
}

#[test]
fn result_and_journal_exports_write_png_files() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let exports = dir.path().join("exports");
    let synthesizer = FixedImage {
        image: Some("data:image/png;base64,aGVsbG8=".to_string()),
        calls: Rc::new(Cell::new(0)),
    };
    let mut app = App::open(LocalStore::new(dir.path()), Box::new(synthesizer), exports.clone());

    complete_exercise(&mut app, 50.0, 70.0);
    let notices = app.dispatch(Action::Export { now_ms: 1234 });
    assert_eq!(notices, vec![Notice::Exported(exports.join("grounding-1234.png"))]);
    assert_eq!(
        std::fs::read(exports.join("grounding-1234.png")).expect("export should exist"),
        b"hello"
    );

    app.dispatch(Action::Save {
        id: "entry".to_string(),
        timestamp: 5678,
    });
    app.dispatch(Action::OpenJournal);
    app.dispatch(Action::ViewEntry("entry".to_string()));
    let notices = app.export();
    assert_eq!(notices, vec![Notice::Exported(exports.join("grounding-5678.png"))]);
}

#[test]
fn settings_changes_persist_and_reload() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let store = LocalStore::new(dir.path());
    let client = GeminiImageClient::new(&ServiceConfig::default()).expect("client should build");
    let mut app = App::open(store.clone(), Box::new(client), dir.path().to_path_buf());

    app.dispatch(Action::OpenSettings);
    app.dispatch(Action::SetHealthSync {
        enabled: true,
        confirmed: true,
    });
    app.dispatch(Action::SetSensitivity(StressSensitivity::High));

    assert_eq!(
        settings_store::load_or_default(&store),
        AppSettings {
            health_sync_enabled: true,
            notifications_enabled: true,
            stress_sensitivity: StressSensitivity::High,
        }
    );

    app.dispatch(Action::SimulateStress);
    assert!(app.context().notification_visible);
    app.dispatch(Action::AcceptNotification);
    assert_eq!(app.context().screen, Screen::PreCheckin);
}

#[test]
fn corrupt_blobs_fall_back_to_defaults() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let store = LocalStore::new(dir.path());
    store
        .write(JOURNAL_KEY, "{ not json")
        .expect("corrupt journal should write");
    store
        .write(ground_me::storage::SETTINGS_KEY, "{ nope")
        .expect("corrupt settings should write");

    let client = GeminiImageClient::new(&ServiceConfig::default()).expect("client should build");
    let app = App::open(store, Box::new(client), dir.path().to_path_buf());
    assert!(app.context().journal.is_empty());
    assert_eq!(app.context().settings, AppSettings::default());
}

#[test]
fn unreadable_journal_reports_save_failure_and_keeps_bytes() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let store = LocalStore::new(dir.path());
    let path = store.path_for(JOURNAL_KEY);
    std::fs::write(&path, [0xff, 0xfe]).expect("raw bytes should write");

    let client = GeminiImageClient::new(&ServiceConfig::default()).expect("client should build");
    let mut app = App::open(store, Box::new(client), dir.path().to_path_buf());
    complete_exercise(&mut app, 40.0, 60.0);

    let notices = app.save_session();
    assert!(
        matches!(notices.as_slice(), [Notice::SaveFailed(_)]),
        "expected a save failure, got {notices:?}"
    );
    assert_eq!(std::fs::read(&path).expect("blob should still exist"), vec![0xff, 0xfe]);
}
