//! Streaming speech-to-text over the Gemini Live WebSocket API.
//!
//! The session is configured for transcription only: the model is told to
//! stay silent, and we only read the `inputTranscription` of what the user
//! said. Any audio the model sends back is ignored.

use std::collections::VecDeque;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::http::Uri;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::config::ServiceConfig;

pub const TRANSCRIBE_INSTRUCTION: &str = "You are a helpful listener for a grounding exercise. Transcribe precisely what the user says. Do not respond with audio, just listen.";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Longest a blocking socket call may run before `cancel` is looked at again.
const CANCEL_CHECK: Duration = Duration::from_millis(250);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("WebSocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("invalid live endpoint: {0}")]
    Endpoint(String),

    #[error("WebSocket handshake did not finish within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("malformed server message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("connection closed before setup completed")]
    ClosedDuringSetup,

    #[error("setup was not confirmed within {0:?}")]
    SetupTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    pub model: String,
    pub system_instruction: String,
    pub sample_rate_hz: u32,
}

impl LiveSetup {
    pub fn transcription(model: impl Into<String>, sample_rate_hz: u32) -> Self {
        Self {
            model: model.into(),
            system_instruction: TRANSCRIBE_INSTRUCTION.to_string(),
            sample_rate_hz,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    SetupComplete,
    InputTranscript(String),
    Closed,
}

pub trait TranscriptionTransport: Send + Sync {
    /// Opens the stream and returns once the service has confirmed setup.
    /// Gives up with `LiveError::Cancelled` shortly after `cancel` is set.
    fn connect(
        &self,
        api_key: &str,
        setup: &LiveSetup,
        cancel: &AtomicBool,
    ) -> Result<Box<dyn TranscriptionLink>, LiveError>;
}

/// An open transcription stream. Owned by a single thread.
pub trait TranscriptionLink {
    fn send_audio(&mut self, pcm: &[u8], sample_rate_hz: u32) -> Result<(), LiveError>;

    /// Next inbound event, or `None` if nothing is waiting.
    fn poll(&mut self) -> Result<Option<LiveEvent>, LiveError>;

    fn close(&mut self) -> Result<(), LiveError>;
}

pub fn setup_message(setup: &LiveSetup) -> Value {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };
    json!({
        "setup": {
            "model": model,
            "generationConfig": { "responseModalities": ["AUDIO"] },
            "systemInstruction": { "parts": [{ "text": setup.system_instruction }] },
            "inputAudioTranscription": {}
        }
    })
}

pub fn pcm_mime_type(sample_rate_hz: u32) -> String {
    format!("audio/pcm;rate={sample_rate_hz}")
}

pub fn audio_message(pcm: &[u8], sample_rate_hz: u32) -> Value {
    json!({
        "realtimeInput": {
            "audio": {
                "mimeType": pcm_mime_type(sample_rate_hz),
                "data": STANDARD.encode(pcm)
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    input_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: Option<String>,
}

/// Events carried by one server frame, in delivery order.
pub fn parse_server_message(payload: &[u8]) -> Result<Vec<LiveEvent>, LiveError> {
    let message: ServerMessage = serde_json::from_slice(payload)?;
    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(LiveEvent::SetupComplete);
    }
    if let Some(text) = message
        .server_content
        .and_then(|content| content.input_transcription)
        .and_then(|transcription| transcription.text)
    {
        if !text.is_empty() {
            events.push(LiveEvent::InputTranscript(text));
        }
    }
    if message.go_away.is_some() {
        events.push(LiveEvent::Closed);
    }
    Ok(events)
}

#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    endpoint: String,
}

impl GeminiLiveTransport {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            endpoint: config.live_endpoint.clone(),
        }
    }
}

impl TranscriptionTransport for GeminiLiveTransport {
    fn connect(
        &self,
        api_key: &str,
        setup: &LiveSetup,
        cancel: &AtomicBool,
    ) -> Result<Box<dyn TranscriptionLink>, LiveError> {
        let url = format!("{}?key={}", self.endpoint, api_key);
        let request = url.as_str().into_client_request()?;
        let stream = open_tcp(request.uri(), cancel)?;
        let socket = websocket_handshake(request, stream, cancel)?;

        let mut link = GeminiLiveLink {
            socket,
            pending: VecDeque::new(),
        };
        link.send_json(&setup_message(setup))?;
        link.await_setup(SETUP_TIMEOUT, cancel)?;
        link.set_timeouts(Some(POLL_TIMEOUT), Some(SEND_TIMEOUT))?;
        info!(model = %setup.model, "live transcription session ready");
        Ok(Box::new(link))
    }
}

fn keep_waiting(cancel: &AtomicBool, deadline: Instant) -> Result<(), LiveError> {
    if cancel.load(Ordering::SeqCst) {
        return Err(LiveError::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(LiveError::HandshakeTimeout(HANDSHAKE_TIMEOUT));
    }
    Ok(())
}

fn endpoint_host(uri: &Uri) -> Result<&str, LiveError> {
    uri.host()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| LiveError::Endpoint("endpoint has no host".to_string()))
}

/// Each address gets one bounded attempt. Reads and writes on the returned
/// stream time out after `CANCEL_CHECK`.
fn open_tcp(uri: &Uri, cancel: &AtomicBool) -> Result<TcpStream, LiveError> {
    let host = endpoint_host(uri)?;
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("wss") { 443 } else { 80 });

    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        if cancel.load(Ordering::SeqCst) {
            return Err(LiveError::Cancelled);
        }
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_read_timeout(Some(CANCEL_CHECK))?;
                stream.set_write_timeout(Some(CANCEL_CHECK))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(error) => {
                debug!(%addr, %error, "live endpoint address unreachable");
                last_error = Some(error);
            }
        }
    }
    Err(match last_error {
        Some(error) => LiveError::Io(error),
        None => LiveError::Endpoint(format!("{host} did not resolve")),
    })
}

fn tls_handshake(
    host: &str,
    stream: TcpStream,
    cancel: &AtomicBool,
    deadline: Instant,
) -> Result<native_tls::TlsStream<TcpStream>, LiveError> {
    let connector = native_tls::TlsConnector::new()?;
    let mut attempt = connector.connect(host, stream);
    loop {
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(native_tls::HandshakeError::WouldBlock(mid)) => {
                keep_waiting(cancel, deadline)?;
                attempt = mid.handshake();
            }
            Err(native_tls::HandshakeError::Failure(error)) => return Err(error.into()),
        }
    }
}

/// Drives TLS and the HTTP upgrade in `CANCEL_CHECK` steps.
fn websocket_handshake(
    request: tungstenite::handshake::client::Request,
    stream: TcpStream,
    cancel: &AtomicBool,
) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, LiveError> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let stream = if request.uri().scheme_str() == Some("wss") {
        let host = endpoint_host(request.uri())?.to_string();
        MaybeTlsStream::NativeTls(tls_handshake(&host, stream, cancel, deadline)?)
    } else {
        MaybeTlsStream::Plain(stream)
    };

    let mut attempt = tungstenite::client(request, stream);
    loop {
        match attempt {
            Ok((socket, response)) => {
                debug!(status = %response.status(), "live socket opened");
                return Ok(socket);
            }
            Err(HandshakeError::Interrupted(mid)) => {
                keep_waiting(cancel, deadline)?;
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(error)) => return Err(error.into()),
        }
    }
}

struct GeminiLiveLink {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<LiveEvent>,
}

impl GeminiLiveLink {
    fn send_json(&mut self, value: &Value) -> Result<(), LiveError> {
        self.socket.send(Message::Text(value.to_string()))?;
        Ok(())
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> Result<(), LiveError> {
        let stream = match self.socket.get_mut() {
            MaybeTlsStream::Plain(stream) => stream,
            MaybeTlsStream::NativeTls(stream) => stream.get_mut(),
            _ => return Ok(()),
        };
        stream.set_read_timeout(read)?;
        stream.set_write_timeout(write)?;
        Ok(())
    }

    fn await_setup(&mut self, limit: Duration, cancel: &AtomicBool) -> Result<(), LiveError> {
        let deadline = Instant::now() + limit;
        self.set_timeouts(Some(CANCEL_CHECK), Some(CANCEL_CHECK))?;
        while Instant::now() < deadline {
            if cancel.load(Ordering::SeqCst) {
                return Err(LiveError::Cancelled);
            }
            match self.read_events()? {
                Some(events) => {
                    let mut confirmed = false;
                    for event in events {
                        match event {
                            LiveEvent::SetupComplete => confirmed = true,
                            LiveEvent::Closed => return Err(LiveError::ClosedDuringSetup),
                            other => self.pending.push_back(other),
                        }
                    }
                    if confirmed {
                        return Ok(());
                    }
                }
                None => continue,
            }
        }
        Err(LiveError::SetupTimeout(limit))
    }

    /// `Ok(None)` when the read timed out with nothing to deliver.
    fn read_events(&mut self) -> Result<Option<Vec<LiveEvent>>, LiveError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(parse_server_message(text.as_bytes())?)),
            Ok(Message::Binary(bytes)) => Ok(Some(parse_server_message(&bytes)?)),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "live socket closed by server");
                Ok(Some(vec![LiveEvent::Closed]))
            }
            Ok(_) => Ok(Some(Vec::new())),
            Err(tungstenite::Error::Io(error))
                if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(Some(vec![LiveEvent::Closed]))
            }
            Err(error) => Err(error.into()),
        }
    }
}

impl TranscriptionLink for GeminiLiveLink {
    fn send_audio(&mut self, pcm: &[u8], sample_rate_hz: u32) -> Result<(), LiveError> {
        self.send_json(&audio_message(pcm, sample_rate_hz))
    }

    fn poll(&mut self) -> Result<Option<LiveEvent>, LiveError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        match self.read_events() {
            Ok(Some(events)) => {
                self.pending.extend(events);
                Ok(self.pending.pop_front())
            }
            Ok(None) => Ok(None),
            Err(LiveError::Protocol(error)) => {
                warn!(%error, "skipping unparsable server message");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn close(&mut self) -> Result<(), LiveError> {
        match self.socket.close(None) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {}
            Err(error) => return Err(error.into()),
        }
        // Flush the close frame; the peer's reply is not awaited.
        match self.socket.flush() {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
