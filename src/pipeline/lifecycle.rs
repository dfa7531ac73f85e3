//! Translation client lifecycle.
//!
//! [`TranslationClient`] ties the pieces together:
//!
//! ```text
//! start(source)
//!   └─▶ mute source, Connecting ──▶ SessionNegotiator (task)
//!         └─▶ ChannelConnector::connect(session.channel_url()) (task)
//!               └─▶ Connected: attach sink, start output
//!                     └─▶ +settle delay ──▶ set_task
//!
//! capture thread ──▶ AudioUplink ──▶ resample ──▶ FrameAssembler ──▶ input_audio_data
//! channel ──▶ orchestrator ──▶ ProtocolClient::handle_inbound ──▶ output / handler
//!
//! stop() | remote close | channel failure
//!   └─▶ teardown (once): unmute + detach source, end_task + close,
//!                        stop output, reset frames, drop session, Disconnected
//! ```
//!
//! Every async result and channel event is funnelled through one
//! orchestration task, which also delivers all handler callbacks.  Each run
//! has a generation number; events tagged with an older generation are
//! discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::audio::{
    new_shared_assembler, resample, CaptureSink, CapturedAudio, OutputDevice, PcmFormat,
    SharedFrameAssembler, SourceTrack,
};
use crate::config::{ChannelConfig, ClientConfig};
use crate::protocol::{ChannelConnector, ChannelEvent, ChannelHandle, WebSocketConnector};
use crate::session::{HttpNegotiator, Session, SessionError, SessionNegotiator};

use super::events::{dispatch, ClientError, NoopHandler, Notification, TranslationHandler};
use super::protocol_client::{ProtocolClient, CLOSE_REASON};
use super::state::{ConnectionState, StateCell};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Orchestrator events
// ---------------------------------------------------------------------------

enum Event {
    Negotiated {
        generation: u64,
        result: Result<Session, SessionError>,
    },
    ChannelOpened {
        generation: u64,
        handle: ChannelHandle,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    },
    ConnectFailed {
        generation: u64,
        error: ClientError,
    },
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    SettleElapsed {
        generation: u64,
    },
    /// The run reached `Connected`.  Delivered only if the run is still
    /// current, so it cannot follow that run's `disconnected`.
    Connected {
        generation: u64,
    },
    Notify(Notification),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    config: ClientConfig,
    channel_config: ChannelConfig,
    state: StateCell,
    generation: AtomicU64,
    protocol: ProtocolClient,
    assembler: SharedFrameAssembler,
    source: Mutex<Option<Arc<dyn SourceTrack>>>,
    session: Mutex<Option<Session>>,
    negotiator: Arc<dyn SessionNegotiator>,
    connector: Arc<dyn ChannelConnector>,
    handler: RwLock<Arc<dyn TranslationHandler>>,
    events: mpsc::UnboundedSender<Event>,
    runtime: Handle,
}

impl Shared {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn post(&self, event: Event) {
        if self.events.send(event).is_err() {
            log::debug!("lifecycle: orchestrator gone, event dropped");
        }
    }

    fn notify(&self, notification: Notification) {
        self.post(Event::Notify(notification));
    }

    /// Single teardown path for `stop`, remote close and channel failure.
    /// Returns `false` if another caller already tore this run down.
    fn teardown(&self) -> bool {
        if !self.state.begin_closing() {
            return false;
        }
        self.next_generation();
        log::info!("lifecycle: tearing down");

        let source = lock(&self.source).take();
        if let Some(source) = source {
            if let Err(e) = source.remove_sink() {
                log::warn!("lifecycle: detaching source failed: {e}");
            }
            source.set_volume(1.0);
        }

        self.protocol.shutdown();

        if let Err(e) = self.protocol.output().stop() {
            log::debug!("lifecycle: output stop: {e}");
        }

        lock(&self.assembler).reset();

        if let Some(session) = lock(&self.session).take() {
            log::debug!("lifecycle: released session {}", session.id);
        }

        self.state.finish_closing();
        self.notify(Notification::ConnectionState(ConnectionState::Disconnected));
        true
    }

    /// Abandon a run that never reached `Connected`.
    fn fail_connecting(&self, error: ClientError) {
        if let Some(source) = lock(&self.source).take() {
            source.set_volume(1.0);
        }
        lock(&self.session).take();
        self.next_generation();

        if self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Idle)
        {
            log::error!("lifecycle: start failed: {}", error.message);
            self.notify(Notification::Error(error));
        }
    }

    fn spawn_connect(&self, generation: u64, endpoint: String) {
        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match connector.connect(&endpoint).await {
                Ok((handle, channel_events)) => Event::ChannelOpened {
                    generation,
                    handle,
                    events: channel_events,
                },
                Err(e) => Event::ConnectFailed {
                    generation,
                    error: e.into(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn spawn_forwarder(
        &self,
        generation: u64,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let events = self.events.clone();
        self.runtime.spawn(async move {
            while let Some(event) = channel_events.recv().await {
                if events.send(Event::Channel { generation, event }).is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_settle_timer(&self, generation: u64) {
        let delay = self.channel_config.settle_delay();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::SettleElapsed { generation });
        });
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

fn deliver(shared: &Shared, notification: &Notification) {
    let handler = shared
        .handler
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    dispatch(handler.as_ref(), notification);
}

async fn run_orchestrator(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Shutdown => break,
            Event::Notify(notification) => deliver(&shared, &notification),
            Event::Connected { generation } => {
                if shared.is_current(generation) {
                    deliver(
                        &shared,
                        &Notification::ConnectionState(ConnectionState::Connected),
                    );
                } else {
                    log::debug!("lifecycle: run ended before `connected` was delivered");
                }
            }
            Event::Negotiated { generation, result } => on_negotiated(&shared, generation, result),
            Event::ChannelOpened {
                generation,
                handle,
                events: channel_events,
            } => on_channel_opened(&shared, generation, handle, channel_events),
            Event::ConnectFailed { generation, error } => {
                if shared.is_current(generation) {
                    shared.fail_connecting(error);
                }
            }
            Event::Channel { generation, event } => {
                if shared.is_current(generation) {
                    on_channel_event(&shared, event);
                }
            }
            Event::SettleElapsed { generation } => {
                if shared.is_current(generation)
                    && shared.state.load() == ConnectionState::Connected
                {
                    shared.protocol.send_set_task(&shared.config);
                }
            }
        }
    }
    log::debug!("lifecycle: orchestrator stopped");
}

fn on_negotiated(shared: &Shared, generation: u64, result: Result<Session, SessionError>) {
    if !shared.is_current(generation) {
        log::debug!("lifecycle: discarding session result from an earlier run");
        return;
    }
    match result {
        Ok(session) => {
            log::info!("lifecycle: session {} ready, opening channel", session.id);
            let endpoint = session.channel_url();
            *lock(&shared.session) = Some(session);
            shared.spawn_connect(generation, endpoint);
        }
        Err(e) => shared.fail_connecting(e.into()),
    }
}

fn on_channel_opened(
    shared: &Arc<Shared>,
    generation: u64,
    handle: ChannelHandle,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    if !shared.is_current(generation)
        || !shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
    {
        log::debug!("lifecycle: channel opened after stop, closing it");
        handle.close(shared.channel_config.close_code, CLOSE_REASON);
        return;
    }

    shared.protocol.attach(handle);

    if let Err(e) = shared.protocol.output().start() {
        log::warn!("lifecycle: output start failed: {e}");
    }

    let source = lock(&shared.source).clone();
    if let Some(source) = &source {
        let uplink = Arc::new(AudioUplink::new(Arc::downgrade(shared), generation));
        if let Err(e) = source.add_sink(uplink) {
            log::warn!("lifecycle: attaching source failed: {e}");
        }
    }

    // A stop that raced the steps above has already run its teardown.
    if !shared.is_current(generation) {
        shared.protocol.shutdown();
        if let Some(source) = &source {
            let _ = source.remove_sink();
        }
        let _ = shared.protocol.output().stop();
        return;
    }

    log::info!("lifecycle: connected");
    shared.post(Event::Connected { generation });
    shared.spawn_forwarder(generation, channel_events);
    shared.spawn_settle_timer(generation);
}

fn on_channel_event(shared: &Shared, event: ChannelEvent) {
    match event {
        ChannelEvent::Message(text) => {
            let translating = shared.state.load() == ConnectionState::Connected;
            if let Some(notification) = shared.protocol.handle_inbound(&text, translating) {
                shared.notify(notification);
            }
        }
        ChannelEvent::Failed(reason) => {
            log::error!("lifecycle: channel failed: {reason}");
            if shared.teardown() {
                shared.notify(Notification::Error(ClientError::new(reason)));
            }
        }
        ChannelEvent::Closed { code, reason } => {
            log::info!("lifecycle: channel closed by remote ({code:?} {reason})");
            shared.teardown();
        }
    }
}

// ---------------------------------------------------------------------------
// AudioUplink
// ---------------------------------------------------------------------------

/// Capture sink that frames source audio onto the channel.
struct AudioUplink {
    shared: Weak<Shared>,
    generation: u64,
    warned_format: AtomicBool,
}

impl AudioUplink {
    fn new(shared: Weak<Shared>, generation: u64) -> Self {
        Self {
            shared,
            generation,
            warned_format: AtomicBool::new(false),
        }
    }
}

impl CaptureSink for AudioUplink {
    fn on_data(&self, audio: CapturedAudio<'_>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !shared.is_current(self.generation)
            || shared.state.load() != ConnectionState::Connected
            || !shared.protocol.is_attached()
        {
            return;
        }
        if audio.bits_per_sample != 16 {
            if !self.warned_format.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "lifecycle: dropping {}-bit capture audio, only 16-bit is supported",
                    audio.bits_per_sample
                );
            }
            return;
        }

        let pcm = resample(
            audio.data,
            PcmFormat::new(audio.sample_rate, audio.channels),
            PcmFormat::PROTOCOL_INPUT,
        );

        // Frames go out under the assembler lock so teardown's reset cannot
        // interleave with a half-sent batch.
        let mut assembler = lock(&shared.assembler);
        for frame in assembler.push_and_drain(&pcm) {
            shared.protocol.send_audio(&frame);
        }
    }
}

// ---------------------------------------------------------------------------
// TranslationClient
// ---------------------------------------------------------------------------

/// Streaming translation client.
///
/// Must be created inside a Tokio runtime; all other methods may be called
/// from any thread.
pub struct TranslationClient {
    shared: Arc<Shared>,
}

impl TranslationClient {
    /// Fails with a [`ClientError`] when called outside a Tokio runtime.
    pub fn new(
        config: ClientConfig,
        channel_config: ChannelConfig,
        output: Arc<dyn OutputDevice>,
        negotiator: Arc<dyn SessionNegotiator>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Result<Self, ClientError> {
        let runtime = Handle::try_current()
            .map_err(|e| ClientError::new(format!("no tokio runtime: {e}")))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let close_code = channel_config.close_code;

        let shared = Arc::new(Shared {
            config,
            channel_config,
            state: StateCell::new(),
            generation: AtomicU64::new(0),
            protocol: ProtocolClient::new(output, close_code),
            assembler: new_shared_assembler(),
            source: Mutex::new(None),
            session: Mutex::new(None),
            negotiator,
            connector,
            handler: RwLock::new(Arc::new(NoopHandler)),
            events: events_tx,
            runtime: runtime.clone(),
        });

        runtime.spawn(run_orchestrator(Arc::clone(&shared), events_rx));
        Ok(Self { shared })
    }

    /// Client using HTTP session negotiation and a WebSocket channel.
    pub fn with_defaults(
        config: ClientConfig,
        channel_config: ChannelConfig,
        output: Arc<dyn OutputDevice>,
    ) -> Result<Self, ClientError> {
        let negotiator = Arc::new(HttpNegotiator::from_config(&channel_config));
        let connector = Arc::new(WebSocketConnector::from_config(&channel_config));
        Self::new(config, channel_config, output, negotiator, connector)
    }

    /// Install the callback receiver.  Takes effect for the next delivered
    /// notification.
    pub fn set_handler(&self, handler: Arc<dyn TranslationHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Begin translating `source`.  Returns `false` (and does nothing) while
    /// a run is already connecting, connected or being torn down.
    pub fn start(&self, source: Arc<dyn SourceTrack>) -> bool {
        let shared = &self.shared;
        if !shared.state.begin_connecting() {
            log::debug!("lifecycle: start ignored in state {}", shared.state.load());
            return false;
        }
        let generation = shared.next_generation();

        source.set_volume(0.0);
        *lock(&shared.source) = Some(source);
        shared.notify(Notification::ConnectionState(ConnectionState::Connecting));
        log::info!(
            "lifecycle: starting ({} -> {})",
            shared.config.source_lang,
            shared.config.target_lang
        );

        let negotiator = Arc::clone(&shared.negotiator);
        let config = shared.config.clone();
        let events = shared.events.clone();
        shared.runtime.spawn(async move {
            let result = negotiator.create_session(&config).await;
            let _ = events.send(Event::Negotiated { generation, result });
        });
        true
    }

    /// Tear the current run down.  Safe to call any number of times from any
    /// thread; only the first call while active does anything.
    pub fn stop(&self) {
        if !self.shared.teardown() {
            log::debug!("lifecycle: stop ignored in state {}", self.shared.state.load());
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// `true` while translated audio is being played.
    pub fn is_translating(&self) -> bool {
        self.is_connected()
    }

    /// Playback volume for translated audio, clamped to `0.0..=1.0`.
    pub fn set_translated_volume(&self, volume: f32) {
        self.shared
            .protocol
            .output()
            .set_volume(volume.clamp(0.0, 1.0));
    }
}

impl Drop for TranslationClient {
    fn drop(&mut self) {
        self.stop();
        self.shared.post(Event::Shutdown);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
