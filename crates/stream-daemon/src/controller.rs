//! PlaybackController — single owner of the playback session.
//!
//! The controller owns the session state, the one live media transport and
//! both keep-alive leases; nothing else touches them. Three independent
//! inputs feed its event loop:
//!
//! ```text
//!   ControllerHandle ──requests──┐
//!   InterruptionSender ──calls───┼──▶ PlaybackController::run()
//!   EventSink (per transport) ───┘      (one at a time, in arrival order)
//! ```
//!
//! Transport events carry the generation of the transport that produced
//! them; anything from an older generation is dropped.
use stream_proto::protocol::{CallState, PlaybackState, StatusSnapshot, Timing};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::interruption::InterruptionSender;
use crate::lease::LeaseManager;
use crate::transport::{
    EventSink, MediaTransport, TransportError, TransportEvent, TransportFactory, TransportNotice,
};

// ── commands / errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    Load(String),
    Play,
    Pause,
    PlayPause,
    Stop,
    SetPosition(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    /// Not handled in the current state.
    Ignored,
}

impl CommandOutcome {
    pub fn applied(self) -> bool {
        self == CommandOutcome::Applied
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("media transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("timing value {0} ms is out of range")]
    Overflow(i64),
    #[error("playback controller is not running")]
    Closed,
}

pub type CommandResult = Result<CommandOutcome, ControllerError>;

/// Requests accepted by the event loop.
#[derive(Debug)]
pub enum ControllerRequest {
    Command {
        command: ControllerCommand,
        reply: oneshot::Sender<CommandResult>,
    },
    Duration {
        reply: oneshot::Sender<Result<Timing, ControllerError>>,
    },
    Position {
        reply: oneshot::Sender<Result<Timing, ControllerError>>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ── controller ────────────────────────────────────────────────────────────────

pub struct PlaybackController {
    factory: Box<dyn TransportFactory>,
    /// At most one live transport.
    transport: Option<Box<dyn MediaTransport>>,
    /// Bumped for every transport created; tags its events.
    generation: u64,
    state: PlaybackState,
    /// State just before the last Ringing/OffHook.
    previous_state: PlaybackState,
    leases: LeaseManager,
    live_url: String,
    source: Option<String>,
    is_live: bool,
    /// Whether call-state events are currently acted on.
    watching_calls: bool,
    notice_tx: mpsc::UnboundedSender<TransportNotice>,
    notices: mpsc::UnboundedReceiver<TransportNotice>,
}

impl PlaybackController {
    pub fn new(
        factory: Box<dyn TransportFactory>,
        leases: LeaseManager,
        live_url: impl Into<String>,
    ) -> Self {
        let (notice_tx, notices) = mpsc::unbounded_channel();
        Self {
            factory,
            transport: None,
            generation: 0,
            state: PlaybackState::Idle,
            previous_state: PlaybackState::Idle,
            leases,
            live_url: live_url.into(),
            source: None,
            is_live: false,
            watching_calls: false,
            notice_tx,
            notices,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn previous_state(&self) -> PlaybackState {
        self.previous_state
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_watching_calls(&self) -> bool {
        self.watching_calls
    }

    // ── commands ──────────────────────────────────────────────────────────────

    pub async fn apply(&mut self, command: ControllerCommand) -> CommandResult {
        debug!("controller: {:?} in {:?}", command, self.state);
        match command {
            ControllerCommand::Load(source) => self.load(source).await,
            ControllerCommand::Play => self.play().await,
            ControllerCommand::Pause => self.pause(false).await,
            ControllerCommand::PlayPause => match self.state {
                PlaybackState::Paused => self.play().await,
                PlaybackState::Playing => self.pause(false).await,
                _ => Ok(CommandOutcome::Ignored),
            },
            ControllerCommand::Stop => self.stop().await,
            ControllerCommand::SetPosition(fraction) => self.set_position(fraction).await,
        }
    }

    async fn load(&mut self, source: String) -> CommandResult {
        self.teardown_transport().await;
        self.state = PlaybackState::Loading;
        self.is_live = source == self.live_url;
        self.source = Some(source.clone());

        match self.start(&source).await {
            Ok(()) => {
                self.state = PlaybackState::Playing;
                self.watching_calls = true;
                info!(
                    "controller: playing {} (live={}, transport #{})",
                    source, self.is_live, self.generation
                );
                Ok(CommandOutcome::Applied)
            }
            Err(e) => Err(self.fall_back_to_idle(e).await),
        }
    }

    /// Create, load and start a fresh transport for `source`.
    async fn start(&mut self, source: &str) -> Result<(), TransportError> {
        self.generation += 1;
        let sink = EventSink::new(self.generation, self.notice_tx.clone());
        let transport = self.transport.insert(self.factory.create(sink).await?);
        transport.load(source).await?;
        self.leases.acquire_all();
        transport.play().await
    }

    async fn play(&mut self) -> CommandResult {
        if self.state != PlaybackState::Paused {
            return Ok(CommandOutcome::Ignored);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(CommandOutcome::Ignored);
        };
        self.leases.acquire_all();
        if let Err(e) = transport.play().await {
            return Err(self.fall_back_to_idle(e).await);
        }
        self.state = PlaybackState::Playing;
        self.watching_calls = true;
        info!("controller: resumed");
        Ok(CommandOutcome::Applied)
    }

    /// `from_call` keeps the call-state subscription so the end of the call
    /// can resume playback.
    async fn pause(&mut self, from_call: bool) -> CommandResult {
        if self.state != PlaybackState::Playing {
            return Ok(CommandOutcome::Ignored);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(CommandOutcome::Ignored);
        };
        if let Err(e) = transport.pause().await {
            return Err(self.fall_back_to_idle(e).await);
        }
        self.leases.release_all();
        if !from_call {
            self.watching_calls = false;
        }
        self.state = PlaybackState::Paused;
        info!("controller: paused{}", if from_call { " for call" } else { "" });
        Ok(CommandOutcome::Applied)
    }

    /// The stopped transport stays around until the next load or shutdown.
    async fn stop(&mut self) -> CommandResult {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            return Ok(CommandOutcome::Ignored);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(CommandOutcome::Ignored);
        };
        if let Err(e) = transport.stop().await {
            return Err(self.fall_back_to_idle(e).await);
        }
        self.leases.release_all();
        self.watching_calls = false;
        self.state = PlaybackState::Idle;
        info!("controller: stopped");
        Ok(CommandOutcome::Applied)
    }

    async fn set_position(&mut self, fraction: f64) -> CommandResult {
        if !fraction.is_finite() {
            warn!("controller: ignoring seek to {}", fraction);
            return Ok(CommandOutcome::Ignored);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Ok(CommandOutcome::Ignored);
        };
        if let Err(e) = transport.seek(fraction.clamp(0.0, 1.0)).await {
            return Err(self.fall_back_to_idle(e).await);
        }
        Ok(CommandOutcome::Applied)
    }

    async fn fall_back_to_idle(&mut self, e: TransportError) -> ControllerError {
        warn!("controller: transport failure, falling back to idle: {}", e);
        self.teardown_transport().await;
        self.leases.release_all();
        self.watching_calls = false;
        self.state = PlaybackState::Idle;
        self.source = None;
        self.is_live = false;
        ControllerError::Transport(e)
    }

    async fn teardown_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!("controller: releasing transport #{}", self.generation);
            if let Err(e) = transport.release().await {
                warn!("controller: transport release failed: {}", e);
            }
        }
    }

    // ── asynchronous inputs ───────────────────────────────────────────────────

    pub async fn on_transport_event(&mut self, notice: TransportNotice) {
        if notice.generation != self.generation || self.transport.is_none() {
            debug!(
                "controller: stale {:?} from transport #{}",
                notice.event, notice.generation
            );
            return;
        }
        match notice.event {
            TransportEvent::EndReached => {
                if self.state != PlaybackState::Playing {
                    debug!("controller: EndReached ignored in {:?}", self.state);
                    return;
                }
                self.leases.release_all();
                self.watching_calls = false;
                self.teardown_transport().await;
                self.state = PlaybackState::Idle;
                info!("controller: end of program reached");
            }
            TransportEvent::Error(message) => {
                let _ = self
                    .fall_back_to_idle(TransportError::Engine(message))
                    .await;
            }
            other => debug!("controller: transport reports {:?}", other),
        }
    }

    pub async fn on_call_state(&mut self, call: CallState) {
        if !self.watching_calls {
            debug!("controller: call state {:?} ignored (not watching)", call);
            return;
        }
        info!("controller: call state {:?} in {:?}", call, self.state);
        let result = match call {
            CallState::Ringing | CallState::OffHook => {
                self.previous_state = self.state;
                self.pause(true).await
            }
            CallState::Idle => {
                if self.previous_state != PlaybackState::Playing {
                    return;
                }
                self.play().await
            }
        };
        if let Err(e) = result {
            warn!("controller: call state {:?} handling failed: {}", call, e);
        }
    }

    // ── queries ───────────────────────────────────────────────────────────────

    pub async fn duration(&mut self) -> Result<Timing, ControllerError> {
        self.timing(TimingQuery::Duration).await
    }

    pub async fn position(&mut self) -> Result<Timing, ControllerError> {
        self.timing(TimingQuery::Position).await
    }

    async fn timing(&mut self, query: TimingQuery) -> Result<Timing, ControllerError> {
        match self.state {
            PlaybackState::Playing => {
                let Some(transport) = self.transport.as_mut() else {
                    return Ok(Timing::Unknown);
                };
                let ms = match query {
                    TimingQuery::Duration => transport.duration().await?,
                    TimingQuery::Position => transport.position().await?,
                };
                to_timing(ms)
            }
            PlaybackState::Paused => Ok(Timing::Unavailable),
            PlaybackState::Idle | PlaybackState::Loading => Ok(Timing::Unknown),
        }
    }

    pub async fn status(&mut self) -> StatusSnapshot {
        let duration = self.duration().await.unwrap_or_else(|e| {
            debug!("controller: duration unavailable: {}", e);
            Timing::Unknown
        });
        let position = self.position().await.unwrap_or_else(|e| {
            debug!("controller: position unavailable: {}", e);
            Timing::Unknown
        });
        StatusSnapshot {
            state: self.state,
            source: self.source.clone(),
            is_live: self.is_live,
            duration,
            position,
        }
    }

    /// Total teardown: never fails, logs whatever goes wrong.
    pub async fn shutdown(&mut self) {
        self.teardown_transport().await;
        self.leases.release_all();
        self.watching_calls = false;
        self.state = PlaybackState::Idle;
        info!("controller: shut down");
    }

    // ── event loop ────────────────────────────────────────────────────────────

    /// Runs until a `Shutdown` request arrives or every `ControllerHandle` is
    /// dropped.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<ControllerRequest>,
        mut calls: mpsc::Receiver<CallState>,
    ) {
        info!("controller: starting event loop");
        let mut calls_open = true;
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(ControllerRequest::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle_request(request).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                call = calls.recv(), if calls_open => match call {
                    Some(call) => self.on_call_state(call).await,
                    None => calls_open = false,
                },
                Some(notice) = self.notices.recv() => self.on_transport_event(notice).await,
            }
        }
        info!("controller: event loop stopped");
    }

    async fn handle_request(&mut self, request: ControllerRequest) {
        match request {
            ControllerRequest::Command { command, reply } => {
                let result = self.apply(command).await;
                let _ = reply.send(result);
            }
            ControllerRequest::Duration { reply } => {
                let _ = reply.send(self.duration().await);
            }
            ControllerRequest::Position { reply } => {
                let _ = reply.send(self.position().await);
            }
            ControllerRequest::Status { reply } => {
                let _ = reply.send(self.status().await);
            }
            ControllerRequest::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TimingQuery {
    Duration,
    Position,
}

fn to_timing(ms: i64) -> Result<Timing, ControllerError> {
    i32::try_from(ms)
        .map(Timing::Millis)
        .map_err(|_| ControllerError::Overflow(ms))
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable front door to a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerRequest>,
}

impl ControllerHandle {
    pub async fn command(&self, command: ControllerCommand) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerRequest::Command { command, reply }).await?;
        rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn load(&self, source: impl Into<String>) -> CommandResult {
        self.command(ControllerCommand::Load(source.into())).await
    }

    pub async fn play(&self) -> CommandResult {
        self.command(ControllerCommand::Play).await
    }

    pub async fn pause(&self) -> CommandResult {
        self.command(ControllerCommand::Pause).await
    }

    pub async fn play_pause(&self) -> CommandResult {
        self.command(ControllerCommand::PlayPause).await
    }

    pub async fn stop(&self) -> CommandResult {
        self.command(ControllerCommand::Stop).await
    }

    pub async fn set_position(&self, fraction: f64) -> CommandResult {
        self.command(ControllerCommand::SetPosition(fraction)).await
    }

    pub async fn duration(&self) -> Result<Timing, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerRequest::Duration { reply }).await?;
        rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn position(&self) -> Result<Timing, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerRequest::Position { reply }).await?;
        rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn is_live(&self) -> Result<bool, ControllerError> {
        Ok(self.status().await?.is_live)
    }

    pub async fn status(&self) -> Result<StatusSnapshot, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerRequest::Status { reply }).await?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    /// Ask the controller to tear down and exit its loop.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerRequest::Shutdown { reply }).await?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    async fn send(&self, request: ControllerRequest) -> Result<(), ControllerError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ControllerError::Closed)
    }
}

/// Spawn `controller` on the runtime and return its two input channels.
pub fn spawn(
    controller: PlaybackController,
) -> (
    ControllerHandle,
    InterruptionSender,
    tokio::task::JoinHandle<()>,
) {
    let (tx, requests) = mpsc::channel(64);
    let (interruptions, calls) = InterruptionSender::channel(16);
    let task = tokio::spawn(controller.run(requests, calls));
    (ControllerHandle { tx }, interruptions, task)
}
