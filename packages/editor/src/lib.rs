//! # Trellis Editor
//!
//! Editable document runtime: an observable node graph with transactional,
//! undoable mutation, a command layer, versioned persistence and an event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ CommandEngine: named commands, one at a time│
//! │  - one outer transaction per execution      │
//! │  - cancel / interactive input               │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ Document: arena + id index + selection      │
//! │  - TransactionLog (nested, undo/redo)       │
//! │  - listeners notified per change            │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ Codec: versioned records + migrations       │
//! │ DocumentStore: bytes on disk / in memory    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The [`EventBus`] sits beside all of this for signals that are not tied to
//! one document.
//!
//! ## Core Principles
//!
//! 1. **Changes carry their inverse**: undo never consults the document
//! 2. **All or nothing**: a failed command or load leaves no trace
//! 3. **Stable type tags**: persisted names never depend on Rust type names
//! 4. **Fail closed**: a broken graph invariant halts the document
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trellis_editor::{CommandEngine, CommandRegistry, Document, Params, TypeRegistry};
//!
//! let registry = Arc::new(TypeRegistry::standard());
//! let doc = Document::new("plan", registry);
//! let mut engine = CommandEngine::new(doc, CommandRegistry::with_builtins());
//!
//! let mut params = Params::new();
//! params.insert("type".into(), "group".into());
//! engine.execute("add_node", params)?;
//! engine.undo()?;
//! ```

pub mod builtin;
mod change;
mod codec;
mod command;
mod config;
mod document;
mod errors;
mod event_bus;
mod migration;
mod node;
mod observable;
mod registry;
mod storage;
mod transaction;

pub use change::Change;
pub use codec::{Codec, SerializedDocument, SerializedNode, MAX_DEPTH, SCHEMA_VERSION};
pub use command::{
    topics, CancelToken, Command, CommandContext, CommandEngine, CommandOutcome, CommandRecord,
    CommandRegistry, CommandStatus, InteractiveCommand, Params, ParamsExt, Step,
};
pub use config::DocumentConfig;
pub use document::{Document, SetOutcome, ROOT_ID, ROOT_TYPE};
pub use errors::{EditorError, EditorResult};
pub use event_bus::{BusEvent, EventBus, SubscriptionToken};
pub use migration::{standard_migrations, AddDefaultProperty, Migration, RenameProperty};
pub use node::{Node, NodeId};
pub use observable::{ListenerError, ListenerId, ListenerResult, Listeners, Notification, Observable};
pub use registry::{NodeSchema, PropertySpec, TypeRegistry};
pub use storage::{DocumentStore, FileStore, MemoryStore};
pub use transaction::{CommitOutcome, HistoryEntry, Transaction, TransactionLog, TransactionStatus};

// Re-export common types for convenience
pub use trellis_common::{OpaqueDescriptor, Value, ValueKind};
