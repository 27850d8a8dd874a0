//! Microphone-to-transcript capture session.
//!
//! `VoiceCapture` is the handle the UI holds. Calling `start` spawns one
//! worker thread that owns every live resource (input device, frame channel,
//! frame processor, remote stream) and runs the capture loop; `stop` signals
//! that worker and waits for it to release everything. Updates reach the UI
//! through a `VoiceListener`.
//!
//! State moves Idle -> Connecting -> Listening -> Idle. A failed start goes
//! Connecting -> Idle. A remote close moves Listening -> Idle without an
//! alert, and the transcript so far is kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{
    encode_pcm16_le, AudioError, AudioInput, CaptureConstraints, FrameAssembler, InputDevice,
    VolumeMeter, SAMPLE_RATE_HZ,
};
use crate::live_transcription::{LiveError, LiveEvent, LiveSetup, TranscriptionLink, TranscriptionTransport};
use crate::transcript::append_fragment;

const FRAME_QUEUE_DEPTH: usize = 64;
const FRAME_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Connecting,
    Listening,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    State(CaptureState),
    /// Full transcript after a fragment or a manual edit.
    Transcript(String),
    Volume(f32),
    /// Message meant for the user.
    Alert(String),
}

pub trait VoiceListener: Send + Sync {
    fn on_event(&self, event: VoiceEvent);
}

impl VoiceListener for std::sync::mpsc::Sender<VoiceEvent> {
    fn on_event(&self, event: VoiceEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("API key is missing. Cannot start voice recognition.")]
    MissingCredential,

    #[error("Could not access microphone. Please check permissions.")]
    Microphone(#[source] AudioError),

    #[error("Could not connect to the transcription service.")]
    Connection(#[source] LiveError),

    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),
}

struct Shared {
    state: CaptureState,
    transcript: String,
    volume: f32,
}

struct Inner {
    shared: Mutex<Shared>,
    listener: Arc<dyn VoiceListener>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CaptureState) {
        let changed = {
            let mut shared = self.lock();
            let changed = shared.state != state;
            shared.state = state;
            changed
        };
        if changed {
            debug!(?state, "voice capture state");
            self.listener.on_event(VoiceEvent::State(state));
        }
    }

    /// Moves to Listening unless a stop already landed.
    fn enter_listening(&self, cancel: &AtomicBool) -> bool {
        {
            let mut shared = self.lock();
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            shared.state = CaptureState::Listening;
        }
        self.listener.on_event(VoiceEvent::State(CaptureState::Listening));
        true
    }

    fn set_volume(&self, level: f32) {
        let changed = {
            let mut shared = self.lock();
            let changed = shared.volume != level;
            shared.volume = level;
            changed
        };
        if changed {
            self.listener.on_event(VoiceEvent::Volume(level));
        }
    }

    fn publish_volume(&self, level: f32, cancel: &AtomicBool) {
        if !cancel.load(Ordering::SeqCst) {
            self.set_volume(level);
        }
    }

    fn replace_transcript(&self, text: String) {
        self.lock().transcript = text.clone();
        self.listener.on_event(VoiceEvent::Transcript(text));
    }

    fn apply_fragment(&self, fragment: &str, cancel: &AtomicBool) {
        let updated = {
            let mut shared = self.lock();
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            match append_fragment(&shared.transcript, fragment) {
                Some(next) => {
                    shared.transcript = next.clone();
                    next
                }
                None => return,
            }
        };
        self.listener.on_event(VoiceEvent::Transcript(updated));
    }

    fn alert(&self, message: String) {
        self.listener.on_event(VoiceEvent::Alert(message));
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct VoiceCapture {
    api_key: Option<String>,
    setup: LiveSetup,
    constraints: CaptureConstraints,
    input: Arc<dyn AudioInput>,
    transport: Arc<dyn TranscriptionTransport>,
    inner: Arc<Inner>,
    worker: Option<Worker>,
}

impl VoiceCapture {
    pub fn new(
        api_key: Option<String>,
        setup: LiveSetup,
        input: Arc<dyn AudioInput>,
        transport: Arc<dyn TranscriptionTransport>,
        listener: Arc<dyn VoiceListener>,
    ) -> Self {
        Self {
            api_key,
            setup,
            constraints: CaptureConstraints::default(),
            input,
            transport,
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: CaptureState::Idle,
                    transcript: String::new(),
                    volume: 0.0,
                }),
                listener,
            }),
            worker: None,
        }
    }

    /// Seeds the transcript without notifying the listener.
    pub fn with_transcript(self, text: impl Into<String>) -> Self {
        self.inner.lock().transcript = text.into();
        self
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    pub fn transcript(&self) -> String {
        self.inner.lock().transcript.clone()
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    /// A manual edit wins over whatever was streamed so far.
    pub fn set_transcript(&self, text: impl Into<String>) {
        self.inner.replace_transcript(text.into());
    }

    pub fn toggle(&mut self) -> Result<(), VoiceError> {
        if self.state() == CaptureState::Idle {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    /// No-op while Connecting or Listening.
    pub fn start(&mut self) -> Result<(), VoiceError> {
        if self.state() != CaptureState::Idle {
            return Ok(());
        }
        // A worker that ended on its own may still be releasing resources.
        self.join_worker();

        let Some(api_key) = self.api_key.clone() else {
            warn!("voice capture requested without an API key");
            let error = VoiceError::MissingCredential;
            self.inner.alert(error.to_string());
            return Err(error);
        };

        self.inner.set_state(CaptureState::Connecting);
        let cancel = Arc::new(AtomicBool::new(false));
        let context = WorkerContext {
            inner: Arc::clone(&self.inner),
            cancel: Arc::clone(&cancel),
            api_key,
            setup: self.setup.clone(),
            constraints: self.constraints,
            input: Arc::clone(&self.input),
            transport: Arc::clone(&self.transport),
        };

        let spawned = std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || run_worker(context));
        match spawned {
            Ok(handle) => {
                info!("voice capture starting");
                self.worker = Some(Worker { cancel, handle });
                Ok(())
            }
            Err(error) => {
                self.inner.set_state(CaptureState::Idle);
                Err(VoiceError::Spawn(error))
            }
        }
    }

    /// Tears the session down. Safe from any state; a no-op when idle.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.as_ref() else {
            return;
        };
        worker.cancel.store(true, Ordering::SeqCst);
        self.join_worker();
        self.inner.set_volume(0.0);
        self.inner.set_state(CaptureState::Idle);
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                warn!("voice capture worker panicked");
            }
        }
    }
}

impl Drop for VoiceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    inner: Arc<Inner>,
    cancel: Arc<AtomicBool>,
    api_key: String,
    setup: LiveSetup,
    constraints: CaptureConstraints,
    input: Arc<dyn AudioInput>,
    transport: Arc<dyn TranscriptionTransport>,
}

enum Outcome {
    Cancelled,
    Failed(VoiceError),
    RemoteEnded(Option<LiveError>),
}

fn run_worker(context: WorkerContext) {
    let mut resources = CaptureResources::default();
    let outcome = capture(&context, &mut resources);
    resources.release();

    if context.cancel.load(Ordering::SeqCst) {
        return;
    }
    match outcome {
        Outcome::Cancelled => return,
        Outcome::Failed(error) => {
            warn!(%error, source = ?std::error::Error::source(&error), "voice capture failed to start");
            context.inner.alert(error.to_string());
        }
        Outcome::RemoteEnded(None) => info!("transcription stream closed by service"),
        Outcome::RemoteEnded(Some(error)) => warn!(%error, "transcription stream failed"),
    }
    context.inner.set_volume(0.0);
    context.inner.set_state(CaptureState::Idle);
}

fn capture(context: &WorkerContext, resources: &mut CaptureResources) -> Outcome {
    let (frame_tx, frame_rx) = sync_channel(FRAME_QUEUE_DEPTH);
    let device = match context.input.open(&context.constraints, frame_tx) {
        Ok(device) => device,
        Err(error) => return Outcome::Failed(VoiceError::Microphone(error)),
    };
    let source_rate = device.sample_rate_hz();
    resources.device = Some(device);
    resources.frames = Some(frame_rx);

    if context.cancel.load(Ordering::SeqCst) {
        return Outcome::Cancelled;
    }

    match context
        .transport
        .connect(&context.api_key, &context.setup, &context.cancel)
    {
        Ok(link) => resources.link = Some(link),
        Err(LiveError::Cancelled) => return Outcome::Cancelled,
        Err(error) => return Outcome::Failed(VoiceError::Connection(error)),
    }
    resources.processor = Some(FrameProcessor::new(source_rate));

    if !context.inner.enter_listening(&context.cancel) {
        return Outcome::Cancelled;
    }
    info!(source_rate, "voice capture listening");

    let CaptureResources {
        link: Some(link),
        processor: Some(processor),
        frames: Some(frames),
        ..
    } = resources
    else {
        return Outcome::Cancelled;
    };

    let mut input_open = true;
    loop {
        if context.cancel.load(Ordering::SeqCst) {
            return Outcome::Cancelled;
        }

        if input_open {
            match frames.recv_timeout(FRAME_WAIT) {
                Ok(chunk) => {
                    // Everything already queued goes out before the next poll.
                    let queued = std::iter::once(chunk).chain(frames.try_iter().take(FRAME_QUEUE_DEPTH));
                    for chunk in queued {
                        if let Err(error) = stream_chunk(context, processor, link.as_mut(), &chunk) {
                            return Outcome::RemoteEnded(Some(error));
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Stream stays open for transcripts still in flight.
                    info!("audio input ended");
                    input_open = false;
                }
            }
        } else {
            std::thread::sleep(FRAME_WAIT);
        }

        loop {
            match link.poll() {
                Ok(Some(LiveEvent::InputTranscript(fragment))) => {
                    context.inner.apply_fragment(&fragment, &context.cancel);
                }
                Ok(Some(LiveEvent::SetupComplete)) => {}
                Ok(Some(LiveEvent::Closed)) => return Outcome::RemoteEnded(None),
                Ok(None) => break,
                Err(error) => return Outcome::RemoteEnded(Some(error)),
            }
        }
    }
}

fn stream_chunk(
    context: &WorkerContext,
    processor: &mut FrameProcessor,
    link: &mut dyn TranscriptionLink,
    chunk: &[f32],
) -> Result<(), LiveError> {
    for frame in processor.push(chunk) {
        if let Some(level) = frame.volume {
            context.inner.publish_volume(level, &context.cancel);
        }
        // A slow link loses audio rather than queueing it.
        link.send_audio(&frame.pcm, SAMPLE_RATE_HZ)?;
    }
    Ok(())
}

struct ProcessedFrame {
    pcm: Vec<u8>,
    volume: Option<f32>,
}

/// Turns raw device chunks into metered, encoded 16 kHz frames.
struct FrameProcessor {
    assembler: FrameAssembler,
    meter: VolumeMeter,
}

impl FrameProcessor {
    fn new(source_rate: u32) -> Self {
        Self {
            assembler: FrameAssembler::new(source_rate),
            meter: VolumeMeter::default(),
        }
    }

    fn push(&mut self, chunk: &[f32]) -> Vec<ProcessedFrame> {
        self.assembler
            .push(chunk)
            .into_iter()
            .map(|frame| ProcessedFrame {
                volume: self.meter.observe(&frame, Instant::now()),
                pcm: encode_pcm16_le(&frame),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStage {
    RemoteStream,
    Processor,
    CaptureConnection,
    InputTracks,
    CaptureContext,
}

/// Everything a running session holds. Released in a fixed order, each
/// step on its own so one failure never strands the rest.
#[derive(Default)]
struct CaptureResources {
    link: Option<Box<dyn TranscriptionLink>>,
    processor: Option<FrameProcessor>,
    frames: Option<Receiver<Vec<f32>>>,
    device: Option<Box<dyn InputDevice>>,
}

impl CaptureResources {
    fn release(&mut self) -> Vec<ReleaseStage> {
        let mut released = Vec::new();

        if let Some(mut link) = self.link.take() {
            if let Err(error) = link.close() {
                warn!(%error, "failed to close transcription stream");
            }
            released.push(ReleaseStage::RemoteStream);
        }
        if self.processor.take().is_some() {
            released.push(ReleaseStage::Processor);
        }
        if self.frames.take().is_some() {
            released.push(ReleaseStage::CaptureConnection);
        }
        if let Some(mut device) = self.device.take() {
            if let Err(error) = device.stop_tracks() {
                warn!(%error, "failed to stop input tracks");
            }
            released.push(ReleaseStage::InputTracks);
            if let Err(error) = device.close() {
                warn!(%error, "failed to close capture context");
            }
            released.push(ReleaseStage::CaptureContext);
        }

        if !released.is_empty() {
            debug!(?released, "capture resources released");
        }
        released
    }
}

impl Drop for CaptureResources {
    fn drop(&mut self) {
        self.release();
    }
}
