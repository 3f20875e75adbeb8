//! Client connection lifecycle manager.
//!
//! `LinkClient` is a cheap handle; all state lives with a single driver
//! task that owns the transport, interprets the pure state machine's
//! effects, and runs every timer (heartbeat ticks, pong deadline, retry
//! backoff) inside its own select loop. Because the timers live in the
//! loop, they die with it: disconnect and shutdown cannot leave a stale
//! timer firing against state that no longer exists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::core::classify::{classify_close, classify_error, CloseInfo};
use crate::core::config::LinkConfig;
use crate::core::envelope::Envelope;
use crate::core::events::{EventBus, LinkEvent};
use crate::core::heartbeat::LivenessTracker;
use crate::core::queue::MessageQueue;
use crate::core::reconnect::{DecayBackoff, ReconnectionStrategy, MIN_DELAY};
use crate::core::state::{
    transition, AtomicConnectionState, AtomicMetrics, ConnectionState, Effect, LinkInput,
};
use crate::error::{LinkError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;

#[derive(Debug)]
enum Command {
    Connect,
    Send(Envelope),
    Disconnect,
    Reset,
    Shutdown,
}

/// Result of a `send()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted on the live connection.
    Sent,
    /// No live connection; buffered for replay after reconnection.
    /// Callers can surface this as a "will retry" indicator.
    Queued,
}

/// Point-in-time view of a client's lifecycle state.
#[derive(Debug, Clone)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub queued_messages: usize,
    pub time_since_last_pong: Option<Duration>,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Client-side connection lifecycle manager.
///
/// Orchestrates connect, heartbeat monitoring, offline queueing, and
/// backoff-scheduled reconnection behind an event surface. Raw
/// transport failures never reach subscribers; they are classified
/// first.
pub struct LinkClient {
    config: LinkConfig,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    queue: Arc<MessageQueue>,
    liveness: Arc<LivenessTracker>,
    attempts: Arc<AtomicU32>,
    events: Arc<EventBus>,
    command_tx: UnboundedSender<Command>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LinkClient {
    /// Create the client and spawn its driver task. The driver idles
    /// in `Disconnected` until `connect()` is called.
    pub fn new(config: LinkConfig) -> Self {
        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected));
        let metrics = Arc::new(AtomicMetrics::new());
        let queue = Arc::new(MessageQueue::new(config.max_queue_size));
        let liveness = Arc::new(LivenessTracker::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let events = Arc::new(EventBus::new());

        let (command_tx, command_rx) = unbounded_channel();

        let driver = Driver {
            config: config.clone(),
            backoff: config.backoff(),
            machine: ConnectionState::Disconnected,
            state: Arc::clone(&state),
            metrics: Arc::clone(&metrics),
            queue: Arc::clone(&queue),
            liveness: Arc::clone(&liveness),
            attempts: Arc::clone(&attempts),
            events: Arc::clone(&events),
            commands: command_rx,
            retry_delay: None,
        };

        let task = tokio::spawn(driver.run());

        Self {
            config,
            state,
            metrics,
            queue,
            liveness,
            attempts,
            events,
            command_tx,
            task: Some(task),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| LinkError::ChannelSend(e.to_string()))
    }

    /// Open the connection. No-op while already connecting or
    /// connected; no-op in `Failed` (use `reset()`).
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Manually close the connection with a normal-closure code and
    /// suppress automatic reconnection.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Disconnect and immediately reconnect with a cleared attempt
    /// counter. The recovery path out of `Failed`.
    pub fn reset(&self) -> Result<()> {
        self.command(Command::Reset)
    }

    /// Send an envelope, queueing it when no connection is live.
    pub fn send(&self, envelope: Envelope) -> Result<SendOutcome> {
        if self.state.is_connected() {
            self.command(Command::Send(envelope))?;
            Ok(SendOutcome::Sent)
        } else if self.config.enable_message_queue {
            self.queue.enqueue(envelope);
            Ok(SendOutcome::Queued)
        } else {
            Err(LinkError::NotConnected)
        }
    }

    /// Subscribe to the full lifecycle event stream.
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Subscribe to message envelopes of a single `type`.
    pub fn subscribe_type(&self, kind: impl Into<String>) -> Receiver<Envelope> {
        self.events.subscribe_type(kind)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state.get(),
            reconnect_attempts: self.attempts.load(Ordering::Acquire),
            queued_messages: self.queue.len(),
            time_since_last_pong: self.liveness.time_since_last_pong(),
            messages_sent: self.metrics.messages_sent(),
            messages_received: self.metrics.messages_received(),
        }
    }

    /// Stop the driver task, closing any live transport first.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

/// How the connected loop ended.
enum LoopExit {
    /// The transport closed (or errored, folded into an abnormal
    /// closure) with this code and reason.
    Closed { code: u16, reason: String },
    /// Manual disconnect: the close event is synthesized as normal
    /// closure and reconnection is suppressed by the `Disconnecting`
    /// state.
    ManualClose,
    /// `reset()` already moved the machine to `Connecting`; no close
    /// input should be fed.
    Resume,
    Terminate,
}

struct Driver {
    config: LinkConfig,
    backoff: DecayBackoff,
    /// Driver-local mirror of the state; the shared cell follows it.
    machine: ConnectionState,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    queue: Arc<MessageQueue>,
    liveness: Arc<LivenessTracker>,
    attempts: Arc<AtomicU32>,
    events: Arc<EventBus>,
    commands: UnboundedReceiver<Command>,
    retry_delay: Option<Duration>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            match self.machine {
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    match self.commands.recv().await {
                        Some(command) => {
                            if !self.handle_idle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                ConnectionState::Connecting => {
                    if !self.run_connect().await {
                        break;
                    }
                }
                ConnectionState::Reconnecting => {
                    if !self.run_backoff().await {
                        break;
                    }
                }
                // Transient states are resolved inline by the loops
                // above; reaching here means a missed close input.
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    warn!(state = self.machine.as_str(), "driver loop in transient state");
                    self.apply(LinkInput::TransportClosed { recoverable: false });
                }
            }
        }
        info!("link driver exiting");
    }

    /// Apply one input to the machine, sync the shared cell, and handle
    /// the context-free effects. Returns the full effect list for the
    /// call site to finish.
    fn apply(&mut self, input: LinkInput) -> Vec<Effect> {
        let result = transition(self.machine, input);
        if result.next != self.machine {
            debug!(
                from = self.machine.as_str(),
                to = result.next.as_str(),
                ?input,
                "state transition"
            );
        }
        self.machine = result.next;
        self.state.set(result.next);

        for effect in &result.effects {
            match effect {
                Effect::ResetAttempts => self.attempts.store(0, Ordering::Release),
                Effect::CancelRetry => self.retry_delay = None,
                Effect::StartHeartbeat => self.liveness.reset(),
                Effect::EmitFailed => {
                    warn!("max reconnect attempts reached");
                    self.events.publish(LinkEvent::MaxReconnectAttemptsReached);
                }
                Effect::ScheduleRetry => self.schedule_retry(),
                // Structural effects handled at the call site.
                _ => {}
            }
        }
        result.effects
    }

    /// Ask the scheduler for the next delay; on refusal the machine
    /// goes terminal.
    fn schedule_retry(&mut self) {
        let attempt = self.attempts.load(Ordering::Acquire);
        match self.backoff.next_delay(attempt) {
            Some(delay) => {
                info!(
                    attempt = attempt + 1,
                    max = self.backoff.max_attempts(),
                    ?delay,
                    "reconnect scheduled"
                );
                self.retry_delay = Some(delay);
                self.events.publish(LinkEvent::Reconnecting {
                    attempt: attempt + 1,
                    max_attempts: self.backoff.max_attempts(),
                    delay,
                });
            }
            None => {
                self.apply(LinkInput::RetriesExhausted);
            }
        }
    }

    /// Commands while no connection work is in flight. Returns false to
    /// terminate the driver.
    fn handle_idle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => {
                self.apply(LinkInput::ConnectRequested);
            }
            Command::Reset => {
                self.apply(LinkInput::ResetRequested);
            }
            Command::Disconnect => {
                self.apply(LinkInput::DisconnectRequested);
            }
            Command::Send(envelope) => {
                if self.config.enable_message_queue {
                    self.queue.enqueue(envelope);
                } else {
                    warn!("dropping send while disconnected, queue disabled");
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Waiting out a backoff delay. The retry timer is the only thing
    /// running; any command that invalidates it cancels it by state
    /// transition.
    async fn run_backoff(&mut self) -> bool {
        let delay = self.retry_delay.take().unwrap_or(MIN_DELAY);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                self.attempts.fetch_add(1, Ordering::AcqRel);
                self.metrics.increment_reconnects();
                self.apply(LinkInput::RetryTimerFired);
                true
            }
            command = self.commands.recv() => match command {
                Some(command) => self.handle_idle_command(command),
                None => false,
            },
        }
    }

    /// One connection attempt.
    async fn run_connect(&mut self) -> bool {
        debug!(url = %self.config.url, "connecting");

        tokio::select! {
            result = connect_async(&self.config.url) => match result {
                Ok((stream, _)) => {
                    info!(url = %self.config.url, "connected");
                    let had_attempts = self.attempts.load(Ordering::Acquire) > 0;
                    let effects = self.apply(LinkInput::TransportOpened);
                    if effects.contains(&Effect::EmitOpen) {
                        self.events.publish(LinkEvent::Open);
                        if had_attempts {
                            self.events.publish(LinkEvent::Reconnected);
                        }
                    }
                    let exit = self.run_connected(stream).await;
                    self.finish_connection(exit)
                }
                Err(error) => {
                    let classification = classify_error(&error.to_string());
                    warn!(kind = classification.kind.as_str(), %error, "connect failed");
                    self.events.publish(LinkEvent::Error(classification));
                    self.apply(LinkInput::ConnectFailed);
                    true
                }
            },
            command = self.commands.recv() => match command {
                Some(Command::Disconnect) => {
                    // The in-flight connect was dropped with the select;
                    // resolve the transient state with a synthetic close.
                    self.apply(LinkInput::DisconnectRequested);
                    if self.machine == ConnectionState::Disconnecting {
                        self.handle_close(classify_close(1000, "connect aborted"));
                    }
                    true
                }
                Some(command) => self.handle_idle_command(command),
                None => false,
            },
        }
    }

    /// Feed the connected loop's exit back into the machine.
    fn finish_connection(&mut self, exit: LoopExit) -> bool {
        match exit {
            LoopExit::Closed { code, reason } => {
                let info = classify_close(code, &reason);
                self.handle_close(info);
                true
            }
            LoopExit::ManualClose => {
                let info = classify_close(1000, "manual disconnect");
                self.handle_close(info);
                true
            }
            LoopExit::Resume => true,
            LoopExit::Terminate => false,
        }
    }

    fn handle_close(&mut self, info: CloseInfo) {
        info!(code = info.code, name = info.name, "connection closed");
        let effects = self.apply(LinkInput::TransportClosed {
            recoverable: info.should_reconnect,
        });
        if effects.contains(&Effect::EmitClose) {
            self.events.publish(LinkEvent::Close(info));
        }
    }

    /// Replay queued messages through the normal send path, oldest
    /// first. A message that fails again goes back on the queue.
    async fn drain_queue(&mut self, write: &mut WsWrite) -> Result<()> {
        let pending = self.queue.drain();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "draining queued messages");
        let mut rest = pending.into_iter();
        while let Some(queued) = rest.next() {
            if let Err(error) = self.write_envelope(write, queued.envelope.clone()).await {
                self.queue.enqueue(queued.envelope);
                for remaining in rest {
                    self.queue.enqueue(remaining.envelope);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    async fn write_envelope(&self, write: &mut WsWrite, envelope: Envelope) -> Result<()> {
        let raw = envelope.stamped().to_json()?;
        write
            .send(Message::Text(raw))
            .await
            .map_err(|e| LinkError::WebSocket(e.to_string()))?;
        self.metrics.increment_sent();
        Ok(())
    }

    /// The connected select loop: inbound frames, caller commands, the
    /// ping ticker, and the pong deadline.
    async fn run_connected(&mut self, stream: WsStream) -> LoopExit {
        let (mut write, mut read) = stream.split();

        if let Err(error) = self.drain_queue(&mut write).await {
            let classification = classify_error(&error.to_string());
            self.events.publish(LinkEvent::Error(classification));
            return LoopExit::Closed {
                code: 1006,
                reason: "send failed during queue drain".into(),
            };
        }

        let mut ping_timer = tokio::time::interval(self.config.heartbeat_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the immediate first tick.
        ping_timer.tick().await;
        let mut pong_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            // Any inbound frame is liveness evidence.
                            pong_deadline = None;
                            match self.handle_frame(&mut write, message).await {
                                Ok(None) => {}
                                Ok(Some(exit)) => return exit,
                                Err(error) => {
                                    let classification = classify_error(&error.to_string());
                                    self.events.publish(LinkEvent::Error(classification));
                                    return LoopExit::Closed {
                                        code: 1006,
                                        reason: error.to_string(),
                                    };
                                }
                            }
                        }
                        Some(Err(error)) => {
                            let classification = classify_error(&error.to_string());
                            warn!(kind = classification.kind.as_str(), %error, "transport error");
                            self.events.publish(LinkEvent::Error(classification));
                            // The stream is unusable after a read error;
                            // fold it into an abnormal closure so the
                            // reconnection path always runs.
                            return LoopExit::Closed {
                                code: 1006,
                                reason: error.to_string(),
                            };
                        }
                        None => {
                            return LoopExit::Closed {
                                code: 1006,
                                reason: "stream ended".into(),
                            };
                        }
                    }
                }

                _ = ping_timer.tick(), if self.config.enable_heartbeat => {
                    if self.config.debug {
                        debug!("heartbeat ping");
                    }
                    if let Err(error) = self.write_envelope(&mut write, Envelope::ping()).await {
                        let classification = classify_error(&error.to_string());
                        self.events.publish(LinkEvent::Error(classification));
                        return LoopExit::Closed {
                            code: 1006,
                            reason: "ping send failed".into(),
                        };
                    }
                    self.liveness.record_ping_sent();
                    if pong_deadline.is_none() {
                        pong_deadline =
                            Some(tokio::time::Instant::now() + self.config.pong_timeout);
                    }
                }

                _ = async {
                    match pong_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    warn!("pong timeout, force-closing stale connection");
                    let effects = self.apply(LinkInput::PongTimedOut);
                    let code = effects
                        .iter()
                        .find_map(|e| match e {
                            Effect::CloseTransport { code } => Some(*code),
                            _ => None,
                        })
                        .unwrap_or(1006);
                    let _ = write.close().await;
                    return LoopExit::Closed {
                        code,
                        reason: "heartbeat timeout".into(),
                    };
                }

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Send(envelope)) => {
                            if let Err(error) = self.write_envelope(&mut write, envelope.clone()).await {
                                if self.config.enable_message_queue {
                                    self.queue.enqueue(envelope);
                                }
                                let classification = classify_error(&error.to_string());
                                self.events.publish(LinkEvent::Error(classification));
                                return LoopExit::Closed {
                                    code: 1006,
                                    reason: "send failed".into(),
                                };
                            }
                        }
                        Some(Command::Disconnect) => {
                            self.apply(LinkInput::DisconnectRequested);
                            Self::send_close(&mut write, 1000, "manual disconnect").await;
                            return LoopExit::ManualClose;
                        }
                        Some(Command::Reset) => {
                            self.apply(LinkInput::ResetRequested);
                            Self::send_close(&mut write, 1000, "reset").await;
                            return LoopExit::Resume;
                        }
                        Some(Command::Connect) => {
                            // Already connected.
                        }
                        Some(Command::Shutdown) | None => {
                            Self::send_close(&mut write, 1000, "shutdown").await;
                            return LoopExit::Terminate;
                        }
                    }
                }
            }
        }
    }

    /// Handle one inbound frame. `Ok(Some(exit))` ends the loop.
    async fn handle_frame(
        &mut self,
        write: &mut WsWrite,
        message: Message,
    ) -> Result<Option<LoopExit>> {
        match message {
            Message::Text(raw) => {
                self.metrics.increment_received();
                let envelope = match Envelope::from_json(&raw) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        warn!(%error, "unparseable envelope, ignoring");
                        return Ok(None);
                    }
                };
                if envelope.is_pong() {
                    self.liveness.record_pong_received();
                    if self.config.debug {
                        debug!("pong received");
                    }
                    return Ok(None);
                }
                if envelope.is_ping() {
                    // Server-initiated application ping.
                    self.write_envelope(write, Envelope::pong()).await?;
                    return Ok(None);
                }
                self.events.publish(LinkEvent::Message(envelope));
                Ok(None)
            }
            Message::Ping(payload) => {
                write
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| LinkError::WebSocket(e.to_string()))?;
                Ok(None)
            }
            Message::Pong(_) => {
                self.liveness.record_pong_received();
                Ok(None)
            }
            Message::Close(frame) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                    None => (1005, String::new()),
                };
                Ok(Some(LoopExit::Closed { code, reason }))
            }
            // Binary payloads and raw frames are not part of the
            // envelope contract.
            _ => Ok(None),
        }
    }

    async fn send_close(write: &mut WsWrite, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = write.send(Message::Close(Some(frame))).await;
        let _ = write.close().await;
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}
