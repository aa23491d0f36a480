//! Chat Integration - interactive command orchestration
//!
//! This crate owns everything between the chat platform and the command handlers:
//! - **Registry** (`registry`) - identifier → handler tables for commands, components, modals
//! - **Router** (`router`) - exact-match dispatch with ephemeral fallbacks
//! - **Flows** (`flow`) - prompt, await click or submission or deadline, clean up
//! - **Responder** (`responder`) - the reply contract and its in-memory recorder
//! - **Discord** (`discord`) - REST adapter, payload builders, command sync
//! - **Discord gateway** (`discord_gateway`) - serenity websocket client feeding the pump
//! - **Gateway** (`gateway`) - interaction pump with reconnection and graceful drain
//!
//! # Architecture
//!
//! ```text
//! Gateway → InteractionRouter → CommandRegistry → Handler
//!                                      ↑              ↓
//!                           transient handlers ← FlowCoordinator
//!                                                     ↓
//!                                         ResponseAdapter → platform
//! ```
//!
//! # Key Types
//!
//! - `CommandRegistry` - concurrent dispatch tables, last write wins
//! - `InteractionRouter` - never propagates handler failures to the transport
//! - `Flow` - one conversation; its transient handlers are removed on every exit path
//! - `ResponseAdapter` - one initial response per token, then edits

pub mod command;
pub mod discord;
pub mod discord_gateway;
pub mod flow;
pub mod gateway;
pub mod interaction;
pub mod message;
pub mod registry;
pub mod responder;
pub mod router;

pub use command::{CommandSchema, OptionKind, OptionSchema};
pub use flow::{ConfirmLabels, Flow, FlowCoordinator, FlowId, FlowOutcome};
pub use interaction::{Interaction, InteractionKind, Invoker, ReplyToken};
pub use message::{Button, ButtonStyle, Embed, ModalSpec, ReplyPayload};
pub use registry::{CommandRegistry, InteractionHandler, SharedHandler};
pub use responder::{RecordingResponder, ResponseAdapter, Session, TransportError};
pub use router::{InteractionRouter, RouteOutcome, SubcommandDispatcher};
