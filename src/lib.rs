pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod export;
pub mod flow;
pub mod grounding;
pub mod image_synthesis;
pub mod journal;
pub mod live_transcription;
pub mod logging;
pub mod mood;
pub mod settings_store;
pub mod storage;
pub mod terminal;
pub mod transcript;
pub mod voice_session;
