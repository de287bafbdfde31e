//! # Chat Engine
//!
//! The single serialized mutation point over the [`ConversationStore`]. One
//! engine task owns the store and the transport; everything else talks to
//! it through a cloneable [`EngineHandle`] (mpsc commands with oneshot
//! responses, same shape as a writer-task handle elsewhere in this
//! ecosystem).
//!
//! Three concurrent sources feed the loop and are interleaved only at
//! command granularity, so a reader can never observe a half-applied
//! mutation:
//!
//! - the driver's decoded event stream,
//! - façade commands (connect, send, trace, target/focus changes, queries),
//! - the cancellable trace-timeout timer.
//!
//! Queries return cloned snapshots; projection runs on the snapshot and
//! never blocks the loop.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::ingest::{self, Event};
use crate::model::{AckStatus, ChatTarget, ConnectionKind, ConnectionStatus, Message, TraceState};
use crate::projection::{project_conversation, ConversationMessage};
use crate::store::ConversationStore;
use crate::transport::{OutboundText, Transport, TransportError};

/// Default bound on how long a path-trace request waits for a response.
pub const DEFAULT_TRACE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors surfaced by façade operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected before any request was issued.
    #[error("message text is empty")]
    EmptyMessage,
    /// Rejected before any request was issued.
    #[error("no active conversation selected")]
    NoActiveTarget,
    /// The external driver rejected the request; prior state is untouched.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The engine task is gone.
    #[error("engine stopped")]
    Closed,
}

/// Receipt for a locally-originated send: the synthesized record id plus
/// the packet id the radio assigned for ack correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub packet_id: u32,
}

enum Command {
    Connect {
        kind: ConnectionKind,
        address: String,
        resp: oneshot::Sender<Result<ConnectionStatus, ChatError>>,
    },
    Disconnect {
        resp: oneshot::Sender<Result<(), ChatError>>,
    },
    Send {
        text: String,
        destination_id: Option<String>,
        channel_index: u32,
        reply_id: Option<u32>,
        resp: oneshot::Sender<Result<SendReceipt, ChatError>>,
    },
    TraceRoute {
        node_id: String,
        resp: oneshot::Sender<Result<(), ChatError>>,
    },
    SetActiveTarget(Option<ChatTarget>),
    SetForeground(bool),
    Snapshot {
        resp: oneshot::Sender<ConversationStore>,
    },
    Conversation {
        target: ChatTarget,
        resp: oneshot::Sender<Vec<ConversationMessage>>,
    },
    Shutdown,
}

/// Cloneable façade over the engine task.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    pub async fn connect(
        &self,
        kind: ConnectionKind,
        address: impl Into<String>,
    ) -> Result<ConnectionStatus, ChatError> {
        self.request(|resp| Command::Connect {
            kind,
            address: address.into(),
            resp,
        })
        .await?
    }

    pub async fn disconnect(&self) -> Result<(), ChatError> {
        self.request(|resp| Command::Disconnect { resp }).await?
    }

    /// Send a text message. Validation (non-empty trimmed text, an active
    /// target) happens before any driver request; an optimistic pending
    /// record is visible in snapshots as soon as this resolves.
    pub async fn send(
        &self,
        text: impl Into<String>,
        destination_id: Option<String>,
        channel_index: u32,
        reply_id: Option<u32>,
    ) -> Result<SendReceipt, ChatError> {
        self.request(|resp| Command::Send {
            text: text.into(),
            destination_id,
            channel_index,
            reply_id,
            resp,
        })
        .await?
    }

    /// Fire a path-trace request toward `node_id` and start the bounded
    /// wait for its result.
    pub async fn trace_route(&self, node_id: impl Into<String>) -> Result<(), ChatError> {
        self.request(|resp| Command::TraceRoute {
            node_id: node_id.into(),
            resp,
        })
        .await?
    }

    pub fn set_active_target(&self, target: Option<ChatTarget>) {
        let _ = self.tx.send(Command::SetActiveTarget(target));
    }

    /// Consumer-supplied foreground/background visibility signal.
    pub fn set_foreground(&self, foregrounded: bool) {
        let _ = self.tx.send(Command::SetForeground(foregrounded));
    }

    /// Consistent snapshot of the whole store.
    pub async fn snapshot(&self) -> Result<ConversationStore, ChatError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    /// Projected view of one conversation.
    pub async fn conversation(
        &self,
        target: ChatTarget,
    ) -> Result<Vec<ConversationMessage>, ChatError> {
        self.request(|resp| Command::Conversation { target, resp })
            .await
    }

    pub async fn status(&self) -> Result<ConnectionStatus, ChatError> {
        Ok(self.snapshot().await?.status().clone())
    }

    pub async fn unread_counts(&self) -> Result<HashMap<String, u32>, ChatError> {
        Ok(self.snapshot().await?.unread_counts().clone())
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ChatError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(build(resp_tx))
            .map_err(|_| ChatError::Closed)?;
        resp_rx.await.map_err(|_| ChatError::Closed)
    }
}

/// The engine task. Construct with [`Engine::new`], hand the returned event
/// sender to the driver, then `tokio::spawn(engine.run())`.
pub struct Engine<T: Transport> {
    store: ConversationStore,
    transport: T,
    events: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::UnboundedReceiver<Command>,
    trace_timeout: Duration,
    /// Target and deadline of the outstanding trace request, if any.
    pending_trace: Option<(String, Instant)>,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T) -> (Self, EngineHandle, mpsc::UnboundedSender<Event>) {
        Self::with_trace_timeout(transport, DEFAULT_TRACE_TIMEOUT)
    }

    pub fn with_trace_timeout(
        transport: T,
        trace_timeout: Duration,
    ) -> (Self, EngineHandle, mpsc::UnboundedSender<Event>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let engine = Engine {
            store: ConversationStore::new(),
            transport,
            events: event_rx,
            commands: command_rx,
            trace_timeout,
            pending_trace: None,
        };
        (engine, EngineHandle { tx: command_tx }, event_tx)
    }

    /// Run until every handle is dropped, `shutdown` is requested, or both
    /// input channels close.
    pub async fn run(mut self) {
        let mut events_open = true;
        loop {
            let trace_deadline = self.pending_trace.as_ref().map(|(_, deadline)| *deadline);
            // Biased: drain delivered events (and expired timers) before
            // answering commands, so a query result always reflects every
            // event that was already handed to us.
            tokio::select! {
                biased;
                maybe_event = self.events.recv(), if events_open => match maybe_event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!("event stream closed");
                        events_open = false;
                    }
                },
                _ = sleep_until_opt(trace_deadline), if trace_deadline.is_some() => {
                    if let Some((target, _)) = self.pending_trace.take() {
                        info!("trace toward {target} timed out");
                        self.store.trace_timed_out(&target);
                    }
                }
                maybe_command = self.commands.recv() => match maybe_command {
                    Some(command) => {
                        if self.on_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("engine loop terminated");
    }

    fn on_event(&mut self, event: Event) {
        ingest::apply_event(&mut self.store, event);
        // A completed trace (or a disconnect-clear) makes the outstanding
        // timer stale; drop it so it cannot fire against a later request.
        if matches!(
            self.store.trace_state(),
            TraceState::Complete(_) | TraceState::Idle
        ) {
            self.pending_trace = None;
        }
    }

    /// Returns true when the loop should stop.
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect {
                kind,
                address,
                resp,
            } => {
                let _ = resp.send(self.do_connect(kind, &address).await);
            }
            Command::Disconnect { resp } => {
                let _ = resp.send(self.do_disconnect().await);
            }
            Command::Send {
                text,
                destination_id,
                channel_index,
                reply_id,
                resp,
            } => {
                let _ = resp
                    .send(self.do_send(text, destination_id, channel_index, reply_id).await);
            }
            Command::TraceRoute { node_id, resp } => {
                let _ = resp.send(self.do_trace_route(node_id).await);
            }
            Command::SetActiveTarget(target) => self.store.set_active_target(target),
            Command::SetForeground(foregrounded) => self.store.set_foreground(foregrounded),
            Command::Snapshot { resp } => {
                let _ = resp.send(self.store.clone());
            }
            Command::Conversation { target, resp } => {
                let _ = resp.send(project_conversation(&self.store, &target));
            }
            Command::Shutdown => return true,
        }
        false
    }

    async fn do_connect(
        &mut self,
        kind: ConnectionKind,
        address: &str,
    ) -> Result<ConnectionStatus, ChatError> {
        // Reconnecting replaces the old session outright.
        if self.store.status().connected {
            if let Err(err) = self.transport.disconnect().await {
                debug!("disconnect before reconnect failed: {err}");
            }
            self.store.set_status(ConnectionStatus::disconnected());
            self.pending_trace = None;
        }
        match self.transport.connect(kind, address).await {
            Ok(status) => {
                info!("connected via {kind} to {address}");
                self.store.set_status(status.clone());
                Ok(status)
            }
            Err(err) => {
                warn!("connect to {address} failed: {err}");
                Err(err.into())
            }
        }
    }

    async fn do_disconnect(&mut self) -> Result<(), ChatError> {
        self.transport.disconnect().await?;
        self.store.set_status(ConnectionStatus::disconnected());
        self.pending_trace = None;
        Ok(())
    }

    async fn do_send(
        &mut self,
        text: String,
        destination_id: Option<String>,
        channel_index: u32,
        reply_id: Option<u32>,
    ) -> Result<SendReceipt, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.store.active_target().is_none() {
            return Err(ChatError::NoActiveTarget);
        }

        let sender = self
            .store
            .status()
            .my_node_id
            .clone()
            .unwrap_or_else(|| "local".to_string());
        let message_id = Uuid::new_v4().to_string();
        let optimistic = Message {
            id: message_id.clone(),
            packet_id: None,
            sender,
            receiver: destination_id.clone(),
            channel: channel_index,
            text: text.clone(),
            timestamp: chrono::Utc::now(),
            ack_status: AckStatus::Pending,
            is_outgoing: true,
            reply_id,
            rx_snr: None,
            hop_limit: None,
        };
        self.store.apply_message_event(optimistic);

        let outbound = OutboundText {
            text,
            destination_id,
            channel_index,
            reply_id,
        };
        match self.transport.send_text(outbound).await {
            Ok(packet_id) => {
                debug!("send accepted, packet id {packet_id}");
                self.store.attach_packet_id(&message_id, packet_id);
                Ok(SendReceipt {
                    message_id,
                    packet_id,
                })
            }
            Err(err) => {
                warn!("send failed for {message_id}: {err}");
                self.store.mark_send_failed(&message_id);
                Err(err.into())
            }
        }
    }

    async fn do_trace_route(&mut self, node_id: String) -> Result<(), ChatError> {
        self.transport.trace_route(&node_id).await?;
        self.store.begin_trace(node_id.clone());
        self.pending_trace = Some((node_id, Instant::now() + self.trace_timeout));
        Ok(())
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        // Guarded out by `if deadline.is_some()`; never completes.
        None => std::future::pending().await,
    }
}
