//! Audio capture backends and the per-frame signal helpers used while
//! streaming to the transcription service.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

#[cfg(feature = "microphone")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "microphone")]
use cpal::{SampleFormat, Stream};
#[cfg(feature = "microphone")]
use serde::Serialize;
#[cfg(feature = "microphone")]
use tracing::warn;

pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const CHANNELS: u16 = 1;
/// Samples per processed block, at `SAMPLE_RATE_HZ`.
pub const FRAME_SAMPLES: usize = 4096;
pub const VOLUME_BOOST: f32 = 5.0;
pub const VOLUME_SUBSAMPLE_STRIDE: usize = 10;
pub const VOLUME_PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

pub type FrameSender = SyncSender<Vec<f32>>;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input microphone is available")]
    NoDevice,

    #[error("microphone not found for id {0}")]
    UnknownDevice(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("unsupported input sample format: {0}")]
    UnsupportedFormat(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            channels: CHANNELS,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Source of mono `f32` sample chunks.
pub trait AudioInput: Send + Sync {
    fn open(
        &self,
        constraints: &CaptureConstraints,
        frames: FrameSender,
    ) -> Result<Box<dyn InputDevice>, AudioError>;
}

/// An acquired capture device. Lives on the thread that opened it.
pub trait InputDevice {
    fn sample_rate_hz(&self) -> u32;

    /// Stops delivery on every capture track.
    fn stop_tracks(&mut self) -> Result<(), AudioError>;

    /// Releases the capture context.
    fn close(self: Box<Self>) -> Result<(), AudioError>;
}

/// Signed 16-bit little-endian PCM, samples clamped to [-1, 1] first.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut output = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = if sample.is_nan() {
            0.0
        } else {
            sample.clamp(-1.0, 1.0)
        };
        let value = if clamped < 0.0 {
            (clamped * 32_768.0) as i16
        } else {
            (clamped * 32_767.0) as i16
        };
        output.extend_from_slice(&value.to_le_bytes());
    }
    output
}

/// Boosted RMS over every tenth sample, clamped to [0, 1].
pub fn volume_level(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let energy = frame
        .iter()
        .step_by(VOLUME_SUBSAMPLE_STRIDE)
        .map(|sample| sample * sample)
        .sum::<f32>();
    let rms = (energy / (frame.len() as f32 / VOLUME_SUBSAMPLE_STRIDE as f32)).sqrt();
    let level = rms * VOLUME_BOOST;
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Rate-limits volume updates for the UI.
#[derive(Debug, Clone)]
pub struct VolumeMeter {
    interval: Duration,
    last_published: Option<Instant>,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new(VOLUME_PUBLISH_INTERVAL)
    }
}

impl VolumeMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_published: None,
        }
    }

    pub fn observe(&mut self, frame: &[f32], now: Instant) -> Option<f32> {
        if let Some(last) = self.last_published {
            if now.saturating_duration_since(last) <= self.interval {
                return None;
            }
        }
        self.last_published = Some(now);
        Some(volume_level(frame))
    }
}

/// Resamples incoming chunks to 16 kHz and cuts them into fixed-size frames.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    source_sample_rate_hz: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(source_sample_rate_hz: u32) -> Self {
        Self {
            source_sample_rate_hz,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    pub fn push(&mut self, chunk: &[f32]) -> Vec<Vec<f32>> {
        let resampled = downsample_to_16k(chunk, self.source_sample_rate_hz);
        self.pending.extend_from_slice(&resampled);

        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let rest = self.pending.split_off(FRAME_SAMPLES);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub fn pcm_i16_to_f32(samples: &[i16]) -> Vec<f32> {
    const SCALE: f32 = i16::MAX as f32;
    samples
        .iter()
        .map(|sample| f32::from(*sample) / SCALE)
        .collect()
}

pub fn downsample_to_16k(input: &[f32], source_sample_rate_hz: u32) -> Vec<f32> {
    if source_sample_rate_hz == SAMPLE_RATE_HZ {
        return input.to_vec();
    }

    if source_sample_rate_hz < SAMPLE_RATE_HZ {
        return Vec::new();
    }

    let ratio = source_sample_rate_hz as f32 / SAMPLE_RATE_HZ as f32;
    let output_length = (input.len() as f32 / ratio).floor() as usize;
    let mut output = Vec::with_capacity(output_length);

    let mut position = 0usize;
    for index in 0..output_length {
        let next_position = (((index + 1) as f32 * ratio).floor() as usize).min(input.len());
        let mut sum = 0f32;
        let mut count = 0usize;
        for sample in &input[position..next_position] {
            sum += *sample;
            count += 1;
        }
        output.push(if count > 0 { sum / count as f32 } else { 0.0 });
        position = next_position;
    }

    output
}

fn interleaved_f32_to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return input.to_vec();
    }

    let mut output = Vec::with_capacity(input.len() / channels);
    for frame in input.chunks_exact(channels) {
        let sum = frame.iter().copied().sum::<f32>();
        output.push(sum / channels as f32);
    }
    output
}

#[cfg(feature = "microphone")]
fn interleaved_i16_to_mono(input: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return pcm_i16_to_f32(input);
    }

    let scale = i16::MAX as f32;
    let mut output = Vec::with_capacity(input.len() / channels);
    for frame in input.chunks_exact(channels) {
        let mut sum = 0f32;
        for sample in frame {
            sum += *sample as f32 / scale;
        }
        output.push(sum / channels as f32);
    }
    output
}

#[cfg(feature = "microphone")]
fn interleaved_u16_to_mono(input: &[u16], channels: usize) -> Vec<f32> {
    let to_f32 = |sample: u16| (sample as f32 / u16::MAX as f32) * 2.0 - 1.0;
    if channels <= 1 {
        return input.iter().map(|sample| to_f32(*sample)).collect();
    }

    let mut output = Vec::with_capacity(input.len() / channels);
    for frame in input.chunks_exact(channels) {
        let sum = frame.iter().map(|sample| to_f32(*sample)).sum::<f32>();
        output.push(sum / channels as f32);
    }
    output
}

#[cfg(feature = "microphone")]
#[derive(Debug, Clone, Serialize)]
pub struct InputMicrophone {
    pub id: String,
    pub label: String,
    pub is_default: bool,
}

#[cfg(feature = "microphone")]
pub fn list_input_microphones() -> Result<Vec<InputMicrophone>, AudioError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());
    let devices = host
        .input_devices()
        .map_err(|error| AudioError::Device(format!("failed to enumerate input devices: {error}")))?;

    let mut microphones = Vec::new();
    for (index, device) in devices.enumerate() {
        let label = device
            .name()
            .unwrap_or_else(|_| format!("Microphone {}", index + 1));
        let is_default = default_name.as_deref() == Some(label.as_str());
        microphones.push(InputMicrophone {
            id: index.to_string(),
            label,
            is_default,
        });
    }

    Ok(microphones)
}

/// Live microphone capture through the platform audio host.
#[cfg(feature = "microphone")]
#[derive(Debug, Clone, Default)]
pub struct MicrophoneInput {
    pub microphone_id: Option<String>,
}

#[cfg(feature = "microphone")]
struct MicrophoneDevice {
    stream: Option<Stream>,
    sample_rate_hz: u32,
}

#[cfg(feature = "microphone")]
impl InputDevice for MicrophoneDevice {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn stop_tracks(&mut self) -> Result<(), AudioError> {
        match &self.stream {
            Some(stream) => stream
                .pause()
                .map_err(|error| AudioError::Device(format!("failed to pause input stream: {error}"))),
            None => Ok(()),
        }
    }

    fn close(mut self: Box<Self>) -> Result<(), AudioError> {
        drop(self.stream.take());
        Ok(())
    }
}

#[cfg(feature = "microphone")]
impl AudioInput for MicrophoneInput {
    fn open(
        &self,
        constraints: &CaptureConstraints,
        frames: FrameSender,
    ) -> Result<Box<dyn InputDevice>, AudioError> {
        let host = cpal::default_host();
        let device = resolve_input_device(&host, self.microphone_id.as_deref())?;
        let supported = preferred_input_config(&device, constraints)?;

        if constraints.echo_cancellation || constraints.noise_suppression || constraints.auto_gain_control {
            debug!("host audio API exposes no voice processing switches; relying on device defaults");
        }

        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        let sample_rate_hz = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels.max(1));

        let error_callback = move |error| {
            warn!(%error, "live input stream error");
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let _ = frames.try_send(interleaved_f32_to_mono(data, channels));
                },
                error_callback,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let _ = frames.try_send(interleaved_i16_to_mono(data, channels));
                },
                error_callback,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _| {
                    let _ = frames.try_send(interleaved_u16_to_mono(data, channels));
                },
                error_callback,
                None,
            ),
            other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
        }
        .map_err(|error| AudioError::Device(format!("failed to build input stream: {error}")))?;

        stream
            .play()
            .map_err(|error| AudioError::Device(format!("failed to start input stream: {error}")))?;

        info!(sample_rate_hz, channels, "microphone opened");
        Ok(Box::new(MicrophoneDevice {
            stream: Some(stream),
            sample_rate_hz,
        }))
    }
}

/// Mono at the target rate when the device offers it, else the device default.
#[cfg(feature = "microphone")]
fn preferred_input_config(
    device: &cpal::Device,
    constraints: &CaptureConstraints,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let target = cpal::SampleRate(constraints.sample_rate_hz);
    if let Ok(mut ranges) = device.supported_input_configs() {
        let exact = ranges.find(|range| {
            range.channels() == constraints.channels
                && range.min_sample_rate() <= target
                && range.max_sample_rate() >= target
        });
        if let Some(range) = exact {
            return Ok(range.with_sample_rate(target));
        }
    }

    device
        .default_input_config()
        .map_err(|error| AudioError::Device(format!("failed to get default input config: {error}")))
}

#[cfg(feature = "microphone")]
fn resolve_input_device(
    host: &cpal::Host,
    microphone_id: Option<&str>,
) -> Result<cpal::Device, AudioError> {
    if let Some(raw_id) = microphone_id {
        let trimmed = raw_id.trim();
        if !trimmed.is_empty() {
            let index = trimmed
                .parse::<usize>()
                .map_err(|_| AudioError::UnknownDevice(trimmed.to_string()))?;
            let mut devices = host
                .input_devices()
                .map_err(|error| AudioError::Device(format!("failed to enumerate input devices: {error}")))?;
            return devices
                .nth(index)
                .ok_or_else(|| AudioError::UnknownDevice(trimmed.to_string()));
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    host.input_devices()
        .map_err(|error| AudioError::Device(format!("failed to enumerate input devices: {error}")))?
        .next()
        .ok_or(AudioError::NoDevice)
}

/// Replays a WAV file as if it were a live microphone, paced in real time.
#[derive(Debug, Clone)]
pub struct WavFileInput {
    path: PathBuf,
    chunk_duration: Duration,
}

impl WavFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_duration: Duration::from_millis(100),
        }
    }

    pub fn with_chunk_duration(mut self, chunk_duration: Duration) -> Self {
        self.chunk_duration = chunk_duration;
        self
    }
}

/// Reads a WAV file as mono `f32` samples plus its sample rate.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32), AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    let mono = interleaved_f32_to_mono(&interleaved, usize::from(spec.channels.max(1)));
    Ok((mono, spec.sample_rate))
}

struct WavPlayback {
    sample_rate_hz: u32,
    stopped: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl InputDevice for WavPlayback {
    fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    fn stop_tracks(&mut self) -> Result<(), AudioError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), AudioError> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            feeder
                .join()
                .map_err(|_| AudioError::Device("WAV feeder thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl AudioInput for WavFileInput {
    fn open(
        &self,
        _constraints: &CaptureConstraints,
        frames: FrameSender,
    ) -> Result<Box<dyn InputDevice>, AudioError> {
        let (samples, sample_rate_hz) = read_wav_mono(&self.path)?;
        let chunk_len = ((sample_rate_hz as f64 * self.chunk_duration.as_secs_f64()) as usize).max(1);
        let pace = self.chunk_duration;
        let stopped = Arc::new(AtomicBool::new(false));
        let feeder_stopped = Arc::clone(&stopped);

        info!(path = %self.path.display(), sample_rate_hz, samples = samples.len(), "replaying WAV input");
        let feeder = std::thread::Builder::new()
            .name("wav-input".to_string())
            .spawn(move || {
                for chunk in samples.chunks(chunk_len) {
                    if feeder_stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    if frames.try_send(chunk.to_vec()).is_err() {
                        debug!("frame channel full or closed; dropping WAV chunk");
                    }
                    std::thread::sleep(pace);
                }
            })
            .map_err(|error| AudioError::Device(format!("failed to spawn WAV feeder: {error}")))?;

        Ok(Box::new(WavPlayback {
            sample_rate_hz,
            stopped,
            feeder: Some(feeder),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn encodes_clamped_little_endian_pcm() {
        let bytes = encode_pcm16_le(&[0.0, 1.0, -1.0, 2.0, -3.0, -0.5]);
        assert_eq!(
            bytes,
            vec![
                0x00, 0x00, // 0
                0xff, 0x7f, // 32767
                0x00, 0x80, // -32768
                0xff, 0x7f, // clamped high
                0x00, 0x80, // clamped low
                0x00, 0xc0, // -16384
            ]
        );
    }

    #[test]
    fn volume_is_clamped_to_unit_range() {
        assert_eq!(volume_level(&[]), 0.0);
        assert_eq!(volume_level(&vec![0.0; 4096]), 0.0);
        assert_eq!(volume_level(&vec![1.0; 4096]), 1.0);
        assert_eq!(volume_level(&vec![50.0; 4096]), 1.0);
        assert_eq!(volume_level(&[f32::NAN; 20]), 0.0);

        let quiet = volume_level(&vec![0.1; 4096]);
        assert!(quiet > 0.45 && quiet < 0.55, "quiet level {quiet}");
    }

    #[test]
    fn meter_publishes_at_most_every_interval() {
        let mut meter = VolumeMeter::default();
        let frame = vec![0.1_f32; 4096];
        let start = Instant::now();

        assert!(meter.observe(&frame, start).is_some());
        assert!(meter.observe(&frame, start + Duration::from_millis(50)).is_none());
        assert!(meter.observe(&frame, start + Duration::from_millis(100)).is_none());
        assert!(meter.observe(&frame, start + Duration::from_millis(101)).is_some());
    }

    #[test]
    fn assembler_emits_fixed_size_frames() {
        let mut assembler = FrameAssembler::new(SAMPLE_RATE_HZ);
        assert!(assembler.push(&vec![0.1; 3000]).is_empty());

        let frames = assembler.push(&vec![0.1; 6000]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.len() == FRAME_SAMPLES));
        assert_eq!(assembler.pending_len(), 9000 - 2 * FRAME_SAMPLES);
    }

    #[test]
    fn assembler_resamples_before_framing() {
        let mut assembler = FrameAssembler::new(48_000);
        let frames = assembler.push(&vec![0.2; FRAME_SAMPLES * 3]);
        assert_eq!(frames.len(), 1);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn downsamples_from_48k_to_16k() {
        let input = vec![0.5_f32; 4_800];
        let output = downsample_to_16k(&input, 48_000);
        assert_eq!(output.len(), 1_600);
    }

    #[test]
    fn returns_empty_when_source_rate_is_below_target() {
        let input = vec![0.5_f32; 2_400];
        let output = downsample_to_16k(&input, 8_000);
        assert!(output.is_empty());
    }

    #[test]
    fn averages_interleaved_f32_channels_to_mono() {
        let stereo = vec![0.2_f32, 0.6_f32, -0.2_f32, 0.2_f32];
        let mono = interleaved_f32_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.4_f32, 0.0_f32]);
    }

    #[test]
    fn wav_input_replays_file_samples() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE_HZ,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("wav writer should open");
        for _ in 0..3_200 {
            writer.write_sample(i16::MAX / 2).expect("sample should write");
        }
        writer.finalize().expect("wav should finalize");

        let (tx, rx) = sync_channel(16);
        let input = WavFileInput::new(&path).with_chunk_duration(Duration::from_millis(10));
        let device = input
            .open(&CaptureConstraints::default(), tx)
            .expect("wav input should open");
        assert_eq!(device.sample_rate_hz(), SAMPLE_RATE_HZ);

        let first = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("first chunk should arrive");
        assert_eq!(first.len(), 160);
        assert!((first[0] - 0.5).abs() < 0.01);

        device.close().expect("wav input should close");
    }
}
