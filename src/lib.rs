//! # Meshchat - Conversation State Engine for Meshtastic Networks
//!
//! Meshchat maintains a correct, idempotent, incrementally-updated
//! conversation model on top of a Meshtastic mesh network's unreliable,
//! duplicate-prone event stream, while serving synchronous commands
//! (connect, send, traceroute) whose results merge consistently with the
//! live stream.
//!
//! ## Features
//!
//! - **Duplicate-tolerant state**: messages dedup on packet id, nodes merge
//!   field-by-field, acks never regress — replaying a snapshot is always
//!   safe.
//! - **Conversation projection**: per-channel and per-peer views with
//!   timestamp ordering, emoji reaction folding, and reply linkage, derived
//!   on demand from the raw log.
//! - **Unread accounting**: per-conversation unread counts driven by the
//!   active target and the consumer's foreground/background signal.
//! - **Optimistic sends**: locally-originated messages appear immediately
//!   as pending and reconcile in place when the radio assigns the
//!   authoritative packet id and ack status.
//! - **Path tracing**: bounded-wait traceroute with cancellable timeouts
//!   and late-result supersession.
//! - **Async Design**: one engine task serializes every mutation; handles
//!   and queries are cheap clones built on Tokio channels.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use meshchat::engine::Engine;
//! use meshchat::model::{ChatTarget, ConnectionKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // `driver` is any Transport implementation from a mesh-radio crate.
//!     let (engine, handle, event_tx) = Engine::new(driver);
//!     tokio::spawn(engine.run());
//!
//!     handle.connect(ConnectionKind::Tcp, "meshtastic.local:4403").await?;
//!     handle.set_active_target(Some(ChatTarget::Channel {
//!         index: 0,
//!         name: "Primary".into(),
//!     }));
//!     handle.send("hello mesh", None, 0, None).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`model`] - Domain records: nodes, channels, messages, trace results
//! - [`store`] - The authoritative state container and all merge rules
//! - [`ingest`] - Decoded-event adaptation onto the store
//! - [`projection`] - Display-side filtering, ordering, reaction folding
//! - [`engine`] - The serialized command façade over store and transport
//! - [`transport`] - Driver boundary trait and port discovery
//! - [`config`] - Configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     events      ┌─────────────────┐
//! │  Mesh driver    │────────────────→│   Engine task   │
//! │  (external)     │←────────────────│  (store owner)  │
//! └─────────────────┘    commands     └─────────────────┘
//!                                             │ snapshots
//!                                     ┌─────────────────┐
//!                                     │   Projection    │ ← pure reads
//!                                     └─────────────────┘
//! ```
//!
//! The driver decodes mesh packets into [`ingest::Event`]s; the engine task
//! is the only writer to the [`store::ConversationStore`]; consumers read
//! cloned snapshots and project views from them.

pub mod config;
pub mod engine;
pub mod ingest;
pub mod logutil;
pub mod model;
pub mod projection;
pub mod store;
pub mod transport;
