//! In-memory collaborators for pipeline tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::{
    CaptureError, CaptureSink, CapturedAudio, OutputDevice, PlaybackError, SourceTrack,
};
use crate::config::ClientConfig;
use crate::protocol::{
    ChannelConnector, ChannelError, ChannelEvent, ChannelHandle, ChannelTransport,
};
use crate::session::{Session, SessionError, SessionNegotiator};

use super::events::{ClientError, Notification, TranslationHandler};
use super::state::ConnectionState;
use crate::protocol::TranscriptionEvent;

/// Let spawned tasks run without advancing the paused clock.
pub async fn pump() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

// ---- Negotiator ---

/// Answers every request with a fixed result.
pub struct MockNegotiator {
    result: Result<Session, SessionError>,
    pub calls: AtomicUsize,
}

impl MockNegotiator {
    pub fn ok() -> Self {
        Self::with(Ok(Session::new("s1", "wss://x", "tok")))
    }

    pub fn with(result: Result<Session, SessionError>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionNegotiator for MockNegotiator {
    async fn create_session(&self, _config: &ClientConfig) -> Result<Session, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

// ---- Connector ---

/// The server's view of one mocked channel.
pub struct MockRemote {
    pub endpoint: String,
    pub transport: ChannelTransport,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
}

impl MockRemote {
    /// Drain queued frames as JSON, audio first and then control messages,
    /// the order the writer flushes them on close.
    pub fn sent(&mut self) -> Vec<serde_json::Value> {
        let mut texts = Vec::new();
        while let Ok(text) = self.transport.outbound.try_recv() {
            texts.push(text);
        }
        while let Ok(text) = self.transport.control.try_recv() {
            texts.push(text);
        }
        texts
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn sent_types(&mut self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| m["message_type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn deliver(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Message(text.to_string()));
    }
}

/// Opens in-memory channels and hands the remote end to the test.
pub struct MockConnector {
    fail: Option<ChannelError>,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                fail: None,
                remotes: tx,
            },
            rx,
        )
    }

    pub fn failing(error: ChannelError) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            fail: Some(error),
            remotes: tx,
        }
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<(ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError> {
        if let Some(e) = &self.fail {
            return Err(e.clone());
        }
        let (handle, transport) = ChannelHandle::pair(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = self.remotes.send(MockRemote {
            endpoint: endpoint.to_string(),
            transport,
            events: events_tx,
        });
        Ok((handle, events_rx))
    }
}

// ---- Source ---

/// Records volume changes and forwards pushed audio to the attached sink.
#[derive(Default)]
pub struct MockSource {
    volumes: Mutex<Vec<f64>>,
    sink: Mutex<Option<Arc<dyn CaptureSink>>>,
    pub removed: AtomicUsize,
}

impl MockSource {
    pub fn volumes(&self) -> Vec<f64> {
        self.volumes.lock().unwrap().clone()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    /// Deliver 16-bit PCM as if captured from the device.
    pub fn emit(&self, data: &[u8], sample_rate: u32, channels: u16) {
        self.emit_with_bits(data, sample_rate, channels, 16);
    }

    pub fn emit_with_bits(&self, data: &[u8], sample_rate: u32, channels: u16, bits: u16) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            let bytes_per_frame = usize::from(channels) * usize::from(bits / 8);
            sink.on_data(CapturedAudio {
                data,
                bits_per_sample: bits,
                sample_rate,
                channels,
                frames: data.len() / bytes_per_frame.max(1),
                timestamp: 0,
            });
        }
    }
}

impl SourceTrack for MockSource {
    fn set_volume(&self, volume: f64) {
        self.volumes.lock().unwrap().push(volume);
    }

    fn add_sink(&self, sink: Arc<dyn CaptureSink>) -> Result<(), CaptureError> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn remove_sink(&self) -> Result<(), CaptureError> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = None;
        Ok(())
    }
}

// ---- Output ---

#[derive(Default)]
pub struct MockOutput {
    started: AtomicBool,
    pub stops: AtomicUsize,
    written: Mutex<Vec<u8>>,
    volume: Mutex<Option<f32>>,
}

impl MockOutput {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn volume(&self) -> Option<f32> {
        *self.volume.lock().unwrap()
    }
}

impl OutputDevice for MockOutput {
    fn start(&self) -> Result<(), PlaybackError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> Result<(), PlaybackError> {
        self.written.lock().unwrap().extend_from_slice(pcm);
        Ok(())
    }

    fn stop(&self) -> Result<(), PlaybackError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.started.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlaybackError::NotPlaying)
        }
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = Some(volume);
    }
}

// ---- Handler ---

/// Records every notification in delivery order.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingHandler {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::ConnectionState(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ClientError> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn transcriptions(&self) -> Vec<TranscriptionEvent> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Transcription(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

impl TranslationHandler for RecordingHandler {
    fn on_connection_state(&self, state: ConnectionState) {
        self.seen
            .lock()
            .unwrap()
            .push(Notification::ConnectionState(state));
    }

    fn on_transcription(&self, event: &TranscriptionEvent) {
        self.seen
            .lock()
            .unwrap()
            .push(Notification::Transcription(event.clone()));
    }

    fn on_error(&self, error: &ClientError) {
        self.seen.lock().unwrap().push(Notification::Error(error.clone()));
    }
}
