//! Replay Session Controller
//!
//! Wraps one `ReplayScheduler` with play/pause/stop control from a remote
//! client. Two tasks per session:
//! - the delivery loop (this future): pulls events from the scheduler and
//!   releases them to the sink while the session is playing
//! - the command listener (spawned): turns inbound frames into state changes
//!
//! The only state they share is a `watch` channel holding `SessionState`.
//! The listener is the sole writer while the session runs; the delivery loop
//! only reads it, and marks the session stopped once it has exited.
//!
//! Pause is release-gated: an event whose wait is already underway still
//! becomes ready, but it is held back and the following event is not
//! computed until playback resumes.

use super::engine::{ReplayConfig, ReplayScheduler};
use crate::models::{Bar, ClientCommand, ServerEvent};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Client sent `stop`
    Command,
    /// Command stream closed
    Disconnected,
    /// Delivery loop exited on its own (exhaustion, error, sink gone)
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Paused,
    Playing,
    Stopped(StopReason),
}

impl SessionState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped(_))
    }

    /// Next state after `command`. `Stopped` is absorbing.
    pub fn apply(self, command: ClientCommand) -> SessionState {
        match (self, command) {
            (SessionState::Stopped(_), _) => self,
            (_, ClientCommand::Play) => SessionState::Playing,
            (_, ClientCommand::Pause) => SessionState::Paused,
            (_, ClientCommand::Stop) => SessionState::Stopped(StopReason::Command),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Scheduler exhausted
    Completed,
    /// Client sent `stop`
    Stopped,
    /// Client or sink went away
    Disconnected,
    /// Configuration, load or data error, reported to the client as `error`
    Failed(String),
}

/// The event sink is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl std::fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event sink closed")
    }
}

impl std::error::Error for SinkClosed {}

/// Outbound half of the replay transport.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &ServerEvent) -> Result<(), SinkClosed>;
}

/// Inbound half of the replay transport.
#[async_trait]
pub trait CommandSource: Send + 'static {
    /// Next text frame from the client, `None` once the client is gone.
    async fn recv(&mut self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Let stop/disconnect cut short a scheduler wait that is already
    /// underway. Off by default: the wait completes before stop is honored.
    pub interrupt_waits_on_stop: bool,
}

/// Aborts the command listener however the session exits.
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn apply_command(state: &watch::Sender<SessionState>, command: ClientCommand) -> bool {
    state.send_if_modified(|current| {
        let next = current.apply(command);
        let changed = next != *current;
        *current = next;
        changed
    })
}

fn mark_stopped(state: &watch::Sender<SessionState>, reason: StopReason) {
    state.send_if_modified(|current| {
        if current.is_stopped() {
            return false;
        }
        *current = SessionState::Stopped(reason);
        true
    });
}

async fn listen_for_commands<C: CommandSource>(
    mut commands: C,
    state: Arc<watch::Sender<SessionState>>,
    session_id: Uuid,
) {
    loop {
        let Some(frame) = commands.recv().await else {
            debug!(session = %session_id, "command stream closed");
            mark_stopped(&state, StopReason::Disconnected);
            break;
        };

        let Some(command) = ClientCommand::parse(&frame) else {
            debug!(session = %session_id, frame = %frame, "ignoring unrecognized command");
            continue;
        };

        if apply_command(&state, command) {
            info!(
                session = %session_id,
                ?command,
                state = ?*state.borrow(),
                "replay state changed"
            );
        }
        if command == ClientCommand::Stop {
            break;
        }
    }
}

/// Resolves once the session is stopped (or the writer is gone).
async fn stopped(mut state: watch::Receiver<SessionState>) {
    let _ = state.wait_for(|s| s.is_stopped()).await;
}

/// One replay session bound to one client.
pub struct ReplaySession<S, C> {
    id: Uuid,
    sink: S,
    commands: C,
    options: SessionOptions,
}

impl<S, C> ReplaySession<S, C>
where
    S: EventSink,
    C: CommandSource,
{
    pub fn new(sink: S, commands: C) -> Self {
        Self {
            id: Uuid::new_v4(),
            sink,
            commands,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the session to completion.
    ///
    /// `load` supplies the bar sequence; its failure is reported to the client
    /// like any other replay error. The session starts paused.
    pub async fn run<F>(self, config: ReplayConfig, load: F) -> SessionOutcome
    where
        F: Future<Output = anyhow::Result<Vec<Bar>>> + Send,
    {
        let Self {
            id,
            mut sink,
            commands,
            options,
        } = self;

        let (state_tx, state_rx) = watch::channel(SessionState::Paused);
        let state_tx = Arc::new(state_tx);
        let _listener = ListenerGuard(tokio::spawn(listen_for_commands(
            commands,
            state_tx.clone(),
            id,
        )));

        info!(session = %id, ?config, "replay session opened (paused)");

        let mut delivery = Delivery {
            id,
            sink: &mut sink,
            state: state_rx,
            options: &options,
            delivered: 0,
        };
        let outcome = delivery.run(config, load).await;
        let delivered = delivery.delivered;

        mark_stopped(&state_tx, StopReason::Finished);
        info!(session = %id, ?outcome, delivered, "replay session closed");
        outcome
    }
}

struct Delivery<'a, S> {
    id: Uuid,
    sink: &'a mut S,
    state: watch::Receiver<SessionState>,
    options: &'a SessionOptions,
    delivered: u64,
}

impl<S: EventSink> Delivery<'_, S> {
    async fn run<F>(&mut self, config: ReplayConfig, load: F) -> SessionOutcome
    where
        F: Future<Output = anyhow::Result<Vec<Bar>>> + Send,
    {
        if let Err(e) = config.validate() {
            return self.fail(e.to_string()).await;
        }

        let bars = match load.await {
            Ok(bars) => bars,
            Err(e) => return self.fail(format!("{:#}", e)).await,
        };
        debug!(session = %self.id, bars = bars.len(), "bars loaded");

        let mut scheduler = match ReplayScheduler::new(bars, config) {
            Ok(scheduler) => scheduler,
            Err(e) => return self.fail(e.to_string()).await,
        };

        loop {
            let next = if self.options.interrupt_waits_on_stop {
                tokio::select! {
                    biased;
                    _ = stopped(self.state.clone()) => return self.stop_outcome(),
                    next = scheduler.next_event() => next,
                }
            } else {
                scheduler.next_event().await
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return SessionOutcome::Completed,
                Err(e) => return self.fail(e.to_string()).await,
            };

            if self.state.borrow().is_stopped() {
                return self.stop_outcome();
            }

            let state = match self.state.wait_for(|s| *s != SessionState::Paused).await {
                Ok(state) => *state,
                Err(_) => SessionState::Stopped(StopReason::Disconnected),
            };
            if state.is_stopped() {
                return self.stop_outcome();
            }

            if self.sink.send(&event.into()).await.is_err() {
                debug!(session = %self.id, "sink closed during delivery");
                return SessionOutcome::Disconnected;
            }
            self.delivered += 1;
        }
    }

    fn stop_outcome(&self) -> SessionOutcome {
        match *self.state.borrow() {
            SessionState::Stopped(StopReason::Command) => SessionOutcome::Stopped,
            _ => SessionOutcome::Disconnected,
        }
    }

    /// Report `message` once unless the client has disconnected, then end the session.
    async fn fail(&mut self, message: String) -> SessionOutcome {
        warn!(session = %self.id, error = %message, "replay aborted");
        if *self.state.borrow() == SessionState::Stopped(StopReason::Disconnected) {
            return SessionOutcome::Failed(message);
        }
        let event = ServerEvent::Error {
            message: message.clone(),
        };
        if self.sink.send(&event).await.is_err() {
            debug!(session = %self.id, "sink closed before error could be reported");
        }
        SessionOutcome::Failed(message)
    }
}
