//! # Command Engine
//!
//! Commands are the only sanctioned way to mutate a document on behalf of a
//! user. Each execution owns one outer transaction, so a command commits
//! whole (one undo entry) or leaves no trace.
//!
//! ```text
//!            execute
//! Idle ───────────────→ Executing ──ok──→ Committed
//!   │                      │   └──err──→ Failed    (rolled back)
//!   │                      └──cancel──→ Cancelled (rolled back)
//!   │ execute (interactive)
//!   └──→ AwaitingInput ⇄ Executing ──→ Committed | Failed | Cancelled
//! ```
//!
//! Only one command runs at a time. While an interactive command waits for
//! input, `execute`, `undo` and `redo` fail with [`EditorError::Busy`].
//!
//! Command bodies see the document through [`CommandContext`], which exposes
//! mutations and queries but no transaction control. Sub-steps that should
//! roll back on their own use [`CommandContext::nested`].

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trellis_common::Value;

use crate::{
    CommitOutcome, Document, EditorError, EditorResult, EventBus, Node, NodeId, SetOutcome,
};

/// Named command arguments
pub type Params = BTreeMap<String, Value>;

/// Bus topics published by the engine
pub mod topics {
    pub const COMMITTED: &str = "command.committed";
    pub const CANCELLED: &str = "command.cancelled";
    pub const FAILED: &str = "command.failed";
    pub const UNDO: &str = "history.undo";
    pub const REDO: &str = "history.redo";
}

/// Records of finished commands kept by the engine
const MAX_RECORDS: usize = 256;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between the engine and whoever may
/// want to stop the running command (another thread, a UI handler)
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Typed access to command parameters
pub trait ParamsExt {
    fn value(&self, name: &str) -> EditorResult<&Value>;

    fn text(&self, name: &str) -> EditorResult<&str>;

    fn optional_text(&self, name: &str) -> EditorResult<Option<&str>>;

    fn node_id(&self, name: &str) -> EditorResult<NodeId>;

    /// Non-negative integer, or `default` when absent
    fn index_or(&self, name: &str, default: usize) -> EditorResult<usize>;
}

impl ParamsExt for Params {
    fn value(&self, name: &str) -> EditorResult<&Value> {
        self.get(name)
            .ok_or_else(|| EditorError::Validation(format!("missing parameter '{}'", name)))
    }

    fn text(&self, name: &str) -> EditorResult<&str> {
        self.value(name)?.as_str().ok_or_else(|| {
            EditorError::Validation(format!("parameter '{}' must be text", name))
        })
    }

    fn optional_text(&self, name: &str) -> EditorResult<Option<&str>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.text(name).map(Some),
        }
    }

    fn node_id(&self, name: &str) -> EditorResult<NodeId> {
        self.text(name).map(NodeId::from)
    }

    fn index_or(&self, name: &str, default: usize) -> EditorResult<usize> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Int(i)) if *i >= 0 => Ok(*i as usize),
            Some(other) => Err(EditorError::Validation(format!(
                "parameter '{}' must be a non-negative integer, got {}",
                name, other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Command context
// ---------------------------------------------------------------------------

/// What a command body may do to the document
pub struct CommandContext<'a> {
    document: &'a mut Document,
    cancel: &'a CancelToken,
    command: &'a str,
}

impl<'a> CommandContext<'a> {
    fn new(document: &'a mut Document, cancel: &'a CancelToken, command: &'a str) -> Self {
        Self {
            document,
            cancel,
            command,
        }
    }

    /// Name of the running command
    pub fn command(&self) -> &str {
        self.command
    }

    /// Read-only view of the document
    pub fn document(&self) -> &Document {
        &*self.document
    }

    /// Fail with [`EditorError::Cancelled`] if cancellation was requested.
    /// Long-running bodies call this between steps.
    pub fn checkpoint(&self) -> EditorResult<()> {
        if self.cancel.is_cancelled() {
            debug!(command = self.command, "Cancellation observed at checkpoint");
            return Err(EditorError::Cancelled);
        }
        Ok(())
    }

    /// Run `f` in a nested transaction. If `f` fails, only its own changes
    /// are rolled back and the error is returned for the body to handle.
    pub fn nested<T>(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Self) -> EditorResult<T>,
    ) -> EditorResult<T> {
        self.document.begin(Some(label))?;
        match f(self) {
            Ok(value) => {
                self.document.commit()?;
                Ok(value)
            }
            Err(e) => {
                if e.is_recoverable() {
                    self.document.rollback()?;
                }
                Err(e)
            }
        }
    }

    pub fn create_node(&mut self, type_tag: &str) -> EditorResult<Node> {
        self.document.create_node(type_tag)
    }

    pub fn add_node(&mut self, parent: &NodeId, node: Node) -> EditorResult<NodeId> {
        self.document.add_node(parent, node)
    }

    pub fn insert_node(
        &mut self,
        parent: &NodeId,
        position: usize,
        node: Node,
    ) -> EditorResult<NodeId> {
        self.document.insert_node(parent, position, node)
    }

    pub fn remove_node(&mut self, id: &NodeId) -> EditorResult<Vec<NodeId>> {
        self.document.remove_node(id)
    }

    pub fn move_node(&mut self, id: &NodeId, parent: &NodeId, position: usize) -> EditorResult<()> {
        self.document.move_node(id, parent, position)
    }

    pub fn set_property(
        &mut self,
        id: &NodeId,
        property: &str,
        value: impl Into<Value>,
    ) -> EditorResult<SetOutcome> {
        self.document.set_property(id, property, value)
    }

    pub fn remove_property(&mut self, id: &NodeId, property: &str) -> EditorResult<SetOutcome> {
        self.document.remove_property(id, property)
    }

    pub fn set_selection<I>(&mut self, ids: I) -> EditorResult<()>
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.document.set_selection(ids)
    }
}

// ---------------------------------------------------------------------------
// Command kinds
// ---------------------------------------------------------------------------

/// A command that runs to completion in one call
pub trait Command {
    fn run(&self, ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()>;
}

struct FnCommand<F>(F);

impl<F> Command for FnCommand<F>
where
    F: Fn(&mut CommandContext<'_>, &Params) -> EditorResult<()>,
{
    fn run(&self, ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
        (self.0)(ctx, params)
    }
}

/// Result of one step of an interactive command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the transaction open and wait for `provide_input`
    AwaitInput,
    Done,
}

/// A command that gathers input over several calls (e.g. a drag). All of
/// its steps share one transaction and become a single undo entry.
pub trait InteractiveCommand {
    fn start(&mut self, ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<Step>;

    fn input(&mut self, ctx: &mut CommandContext<'_>, input: &Value) -> EditorResult<Step>;
}

type InteractiveFactory = Box<dyn Fn() -> Box<dyn InteractiveCommand>>;

enum Handler {
    Immediate(Box<dyn Command>),
    Interactive(InteractiveFactory),
}

/// Command handlers by name
#[derive(Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<String, Handler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in commands (see [`crate::builtin`])
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, command: impl Command + 'static) {
        self.handlers
            .insert(name.into(), Handler::Immediate(Box::new(command)));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut CommandContext<'_>, &Params) -> EditorResult<()> + 'static,
    {
        self.register(name, FnCommand(f));
    }

    /// `factory` builds a fresh instance for every execution
    pub fn register_interactive<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn InteractiveCommand> + 'static,
    {
        self.handlers
            .insert(name.into(), Handler::Interactive(Box::new(factory)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_interactive(&self, name: &str) -> bool {
        matches!(self.handlers.get(name), Some(Handler::Interactive(_)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Outcomes and records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Executing,
    AwaitingInput,
    Committed,
    Cancelled,
    Failed,
}

/// What a call into the engine ended with. Validation and other recoverable
/// errors from a command body are reported as `Failed`, not as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Committed,
    AwaitingInput,
    Cancelled,
    Failed(EditorError),
}

/// Audit entry for one command execution
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub name: String,
    pub params: Params,
    pub status: CommandStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Changes in the committed undo entry
    pub changes: usize,
    pub error: Option<String>,
}

impl CommandRecord {
    fn start(name: &str, params: Params) -> Self {
        Self {
            name: name.to_string(),
            params,
            status: CommandStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            changes: 0,
            error: None,
        }
    }
}

struct ActiveCommand {
    record: CommandRecord,
    instance: Box<dyn InteractiveCommand>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs commands against one document
pub struct CommandEngine {
    document: Document,
    registry: CommandRegistry,
    active: Option<ActiveCommand>,
    cancel: CancelToken,
    records: VecDeque<CommandRecord>,
    bus: Option<EventBus>,
}

impl CommandEngine {
    pub fn new(document: Document, registry: CommandRegistry) -> Self {
        Self {
            document,
            registry,
            active: None,
            cancel: CancelToken::new(),
            records: VecDeque::new(),
            bus: None,
        }
    }

    /// Publish command and history events on `bus`
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Direct access for non-command work (subscribing, selection, saving).
    /// Refused while a command is active.
    pub fn document_mut(&mut self) -> EditorResult<&mut Document> {
        self.ensure_idle()?;
        Ok(&mut self.document)
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    /// Handle for requesting cancellation of the running command
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Status of the active command, if any
    pub fn active_status(&self) -> Option<CommandStatus> {
        self.active.as_ref().map(|a| a.record.status)
    }

    /// Finished commands, oldest first
    pub fn records(&self) -> impl Iterator<Item = &CommandRecord> {
        self.records.iter()
    }

    pub fn last_record(&self) -> Option<&CommandRecord> {
        self.records.back()
    }

    /// Run a registered command. Interactive commands start and return
    /// [`CommandOutcome::AwaitingInput`] unless they finish immediately.
    pub fn execute(&mut self, name: &str, params: Params) -> EditorResult<CommandOutcome> {
        self.ensure_idle()?;
        if self.document.in_transaction() {
            return Err(EditorError::Busy(
                "a transaction is open on the document".to_string(),
            ));
        }
        let handler = self
            .registry
            .handlers
            .get(name)
            .ok_or_else(|| EditorError::NotFound(format!("command '{}'", name)))?;

        self.cancel.reset();
        let mut record = CommandRecord::start(name, params);
        self.document.begin(Some(name))?;
        record.status = CommandStatus::Executing;
        debug!(command = name, "Executing command");

        let mut ctx = CommandContext::new(&mut self.document, &self.cancel, name);
        match handler {
            Handler::Immediate(command) => {
                let result = command.run(&mut ctx, &record.params);
                self.finish(record, result)
            }
            Handler::Interactive(factory) => {
                let mut instance = factory();
                let result = instance.start(&mut ctx, &record.params);
                self.step(record, instance, result)
            }
        }
    }

    /// Feed input to the interactive command awaiting it
    pub fn provide_input(&mut self, input: Value) -> EditorResult<CommandOutcome> {
        let Some(ActiveCommand {
            mut record,
            mut instance,
        }) = self.active.take()
        else {
            return Err(EditorError::NotFound(
                "no command is awaiting input".to_string(),
            ));
        };

        if self.cancel.is_cancelled() {
            return self.finish(record, Err(EditorError::Cancelled));
        }

        record.status = CommandStatus::Executing;
        let mut ctx = CommandContext::new(&mut self.document, &self.cancel, &record.name);
        let result = instance.input(&mut ctx, &input);
        self.step(record, instance, result)
    }

    /// Cancel the command awaiting input, rolling back everything it did.
    /// Returns `None` when no command is active.
    pub fn cancel_active(&mut self) -> EditorResult<Option<CommandOutcome>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        self.cancel.cancel();
        self.finish(active.record, Err(EditorError::Cancelled))
            .map(Some)
    }

    pub fn undo(&mut self) -> EditorResult<bool> {
        self.ensure_idle()?;
        let label = self.document.history().undo_label().map(str::to_string);
        let undone = self.document.undo()?;
        if undone {
            self.publish(topics::UNDO, label.as_deref(), None);
        }
        Ok(undone)
    }

    pub fn redo(&mut self) -> EditorResult<bool> {
        self.ensure_idle()?;
        let label = self.document.history().redo_label().map(str::to_string);
        let redone = self.document.redo()?;
        if redone {
            self.publish(topics::REDO, label.as_deref(), None);
        }
        Ok(redone)
    }

    fn ensure_idle(&self) -> EditorResult<()> {
        match &self.active {
            Some(active) => Err(EditorError::Busy(format!(
                "command '{}' is awaiting input",
                active.record.name
            ))),
            None => Ok(()),
        }
    }

    /// Route the result of an interactive step
    fn step(
        &mut self,
        mut record: CommandRecord,
        instance: Box<dyn InteractiveCommand>,
        result: EditorResult<Step>,
    ) -> EditorResult<CommandOutcome> {
        match result {
            Ok(Step::AwaitInput) => {
                record.status = CommandStatus::AwaitingInput;
                debug!(command = %record.name, "Awaiting input");
                self.active = Some(ActiveCommand { record, instance });
                Ok(CommandOutcome::AwaitingInput)
            }
            Ok(Step::Done) => self.finish(record, Ok(())),
            Err(e) => self.finish(record, Err(e)),
        }
    }

    /// Close the command's transaction according to `result`
    fn finish(
        &mut self,
        mut record: CommandRecord,
        result: EditorResult<()>,
    ) -> EditorResult<CommandOutcome> {
        let result = match result {
            Ok(()) if self.cancel.is_cancelled() => Err(EditorError::Cancelled),
            other => other,
        };

        let outcome = match result {
            Ok(()) => {
                if let CommitOutcome::Committed { changes } = self.document.commit()? {
                    record.changes = changes;
                }
                record.status = CommandStatus::Committed;
                info!(command = %record.name, changes = record.changes, "Command committed");
                CommandOutcome::Committed
            }
            Err(EditorError::Cancelled) => {
                self.unwind()?;
                record.status = CommandStatus::Cancelled;
                info!(command = %record.name, "Command cancelled");
                CommandOutcome::Cancelled
            }
            Err(e) if !e.is_recoverable() => {
                if !self.document.is_halted() {
                    self.unwind()?;
                }
                record.status = CommandStatus::Failed;
                record.error = Some(e.to_string());
                record.finished_at = Some(Utc::now());
                self.push_record(record);
                return Err(e);
            }
            Err(e) => {
                self.unwind()?;
                record.status = CommandStatus::Failed;
                record.error = Some(e.to_string());
                warn!(command = %record.name, error = %e, "Command failed");
                CommandOutcome::Failed(e)
            }
        };

        self.cancel.reset();
        record.finished_at = Some(Utc::now());

        let topic = match outcome {
            CommandOutcome::Committed => topics::COMMITTED,
            CommandOutcome::Cancelled => topics::CANCELLED,
            _ => topics::FAILED,
        };
        self.publish(topic, Some(&record.name), record.error.as_deref());
        self.push_record(record);
        Ok(outcome)
    }

    /// Roll back every open transaction level
    fn unwind(&mut self) -> EditorResult<()> {
        while self.document.in_transaction() {
            self.document.rollback()?;
        }
        Ok(())
    }

    fn push_record(&mut self, record: CommandRecord) {
        if self.records.len() == MAX_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    fn publish(&self, topic: &str, name: Option<&str>, error: Option<&str>) {
        let Some(bus) = &self.bus else {
            return;
        };
        let mut payload = BTreeMap::new();
        payload.insert("document".to_string(), Value::from(self.document.key()));
        if let Some(name) = name {
            payload.insert("name".to_string(), Value::from(name));
        }
        if let Some(error) = error {
            payload.insert("error".to_string(), Value::from(error));
        }
        bus.publish(topic, payload);
    }
}

impl fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEngine")
            .field("document", &self.document.key())
            .field("registry", &self.registry)
            .field("active", &self.active.as_ref().map(|a| &a.record.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusEvent, TypeRegistry, ROOT_ID};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn engine() -> CommandEngine {
        let doc = Document::new("test", Arc::new(TypeRegistry::standard()));
        CommandEngine::new(doc, CommandRegistry::new())
    }

    fn root() -> NodeId {
        NodeId::from(ROOT_ID)
    }

    /// Adds a group, then asks for a name for it on each input;
    /// `Null` finishes the command
    struct NameGroup {
        id: Option<NodeId>,
    }

    impl InteractiveCommand for NameGroup {
        fn start(&mut self, ctx: &mut CommandContext<'_>, _: &Params) -> EditorResult<Step> {
            let node = ctx.create_node("group")?;
            self.id = Some(ctx.add_node(&root(), node)?);
            Ok(Step::AwaitInput)
        }

        fn input(&mut self, ctx: &mut CommandContext<'_>, input: &Value) -> EditorResult<Step> {
            let Some(id) = self.id.clone() else {
                return Err(EditorError::Validation("not started".to_string()));
            };
            if input.is_null() {
                return Ok(Step::Done);
            }
            ctx.set_property(&id, "name", input.clone())?;
            Ok(Step::AwaitInput)
        }
    }

    fn with_name_group(mut engine: CommandEngine) -> CommandEngine {
        engine
            .registry_mut()
            .register_interactive("name_group", || Box::new(NameGroup { id: None }));
        engine
    }

    #[test]
    fn test_command_commits_one_undo_entry() {
        let mut engine = engine();
        engine.registry_mut().register_fn("two_groups", |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group"))?;
            ctx.add_node(&root(), Node::new("b", "group"))?;
            Ok(())
        });

        let outcome = engine.execute("two_groups", Params::new()).unwrap();
        assert_eq!(outcome, CommandOutcome::Committed);
        assert_eq!(engine.document().node_count(), 3);
        assert_eq!(engine.document().history().undo_levels(), 1);
        assert_eq!(engine.document().history().undo_label(), Some("two_groups"));

        let record = engine.last_record().unwrap();
        assert_eq!(record.status, CommandStatus::Committed);
        assert_eq!(record.changes, 2);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_failed_command_leaves_no_trace() {
        let mut engine = engine();
        engine.registry_mut().register_fn("half", |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group"))?;
            ctx.set_property(&"a".into(), "visible", "not a bool")?;
            Ok(())
        });

        let outcome = engine.execute("half", Params::new()).unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(EditorError::Validation(_))));
        assert_eq!(engine.document().node_count(), 1);
        assert!(!engine.document().history().can_undo());
        assert!(!engine.document().in_transaction());
        assert_eq!(engine.last_record().unwrap().status, CommandStatus::Failed);
    }

    #[test]
    fn test_failed_command_restores_selection() {
        let mut engine = engine();
        engine.registry_mut().register_fn("add_a", |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group"))?;
            Ok(())
        });
        engine.registry_mut().register_fn("select_then_fail", |ctx, _| {
            ctx.set_selection(vec![NodeId::from("a")])?;
            Err(EditorError::Validation("boom".to_string()))
        });
        engine.execute("add_a", Params::new()).unwrap();

        let outcome = engine.execute("select_then_fail", Params::new()).unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(EditorError::Validation(_))));
        assert!(engine.document().selection().is_empty());
    }

    #[test]
    fn test_nested_failure_restores_its_own_selection() {
        let mut engine = engine();
        engine.registry_mut().register_fn("pick", |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group"))?;
            ctx.add_node(&root(), Node::new("b", "group"))?;
            ctx.set_selection(vec![NodeId::from("a")])?;
            let attempt = ctx.nested("retarget", |ctx| {
                ctx.set_selection(vec![NodeId::from("b")])?;
                ctx.remove_node(&"ghost".into())
            });
            assert!(attempt.is_err());
            Ok(())
        });

        assert_eq!(
            engine.execute("pick", Params::new()).unwrap(),
            CommandOutcome::Committed
        );
        assert_eq!(engine.document().selection(), &[NodeId::from("a")]);
    }

    #[test]
    fn test_unknown_command_is_not_found() {
        let mut engine = engine();
        assert!(matches!(
            engine.execute("nope", Params::new()),
            Err(EditorError::NotFound(_))
        ));
    }

    #[test]
    fn test_checkpoint_cancellation_rolls_back() {
        let mut engine = engine();
        let token = engine.cancel_handle();
        engine.registry_mut().register_fn("slow", move |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group"))?;
            token.cancel();
            ctx.checkpoint()?;
            ctx.add_node(&root(), Node::new("b", "group"))?;
            Ok(())
        });

        let outcome = engine.execute("slow", Params::new()).unwrap();
        assert_eq!(outcome, CommandOutcome::Cancelled);
        assert_eq!(engine.document().node_count(), 1);
        assert!(!engine.cancel_handle().is_cancelled());
    }

    #[test]
    fn test_nested_failure_is_contained() {
        let mut engine = engine();
        engine.registry_mut().register_fn("tolerant", |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group"))?;
            let attempt = ctx.nested("risky", |ctx| {
                ctx.add_node(&root(), Node::new("b", "group"))?;
                ctx.move_node(&"a".into(), &"a".into(), 0)
            });
            assert!(matches!(attempt, Err(EditorError::Cycle { .. })));
            Ok(())
        });

        assert_eq!(
            engine.execute("tolerant", Params::new()).unwrap(),
            CommandOutcome::Committed
        );
        let doc = engine.document();
        assert!(doc.contains(&"a".into()));
        assert!(!doc.contains(&"b".into()));
        assert_eq!(doc.history().undo_levels(), 1);
    }

    #[test]
    fn test_interactive_command_is_one_undo_entry() {
        let mut engine = with_name_group(engine());

        assert_eq!(
            engine.execute("name_group", Params::new()).unwrap(),
            CommandOutcome::AwaitingInput
        );
        assert_eq!(engine.active_status(), Some(CommandStatus::AwaitingInput));
        engine.provide_input(Value::from("Wal")).unwrap();
        engine.provide_input(Value::from("Walls")).unwrap();
        assert_eq!(
            engine.provide_input(Value::Null).unwrap(),
            CommandOutcome::Committed
        );

        assert!(!engine.is_busy());
        assert_eq!(engine.document().history().undo_levels(), 1);
        engine.undo().unwrap();
        assert_eq!(engine.document().node_count(), 1);
    }

    #[test]
    fn test_busy_while_awaiting_input() {
        let mut engine = with_name_group(engine());
        engine.registry_mut().register_fn("noop", |_, _| Ok(()));

        engine.execute("name_group", Params::new()).unwrap();
        assert!(matches!(
            engine.execute("noop", Params::new()),
            Err(EditorError::Busy(_))
        ));
        assert!(matches!(engine.undo(), Err(EditorError::Busy(_))));
        assert!(matches!(engine.redo(), Err(EditorError::Busy(_))));
        assert!(matches!(engine.document_mut(), Err(EditorError::Busy(_))));
    }

    #[test]
    fn test_cancel_active_restores_state() {
        let mut engine = with_name_group(engine());

        engine.execute("name_group", Params::new()).unwrap();
        engine.provide_input(Value::from("Walls")).unwrap();
        assert_eq!(
            engine.cancel_active().unwrap(),
            Some(CommandOutcome::Cancelled)
        );

        assert_eq!(engine.document().node_count(), 1);
        assert!(!engine.document().in_transaction());
        assert!(!engine.is_busy());
        assert_eq!(engine.cancel_active().unwrap(), None);
    }

    #[test]
    fn test_provide_input_without_active_command() {
        let mut engine = engine();
        assert!(matches!(
            engine.provide_input(Value::Null),
            Err(EditorError::NotFound(_))
        ));
    }

    #[test]
    fn test_outcomes_are_published() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for topic in [topics::COMMITTED, topics::FAILED, topics::UNDO] {
            let seen = seen.clone();
            bus.subscribe(topic, move |e: &BusEvent| {
                seen.borrow_mut().push(e.topic.clone());
                Ok(())
            });
        }

        let mut engine = engine().with_bus(bus);
        engine.registry_mut().register_fn("add", |ctx, _| {
            ctx.add_node(&root(), Node::new("a", "group")).map(|_| ())
        });
        engine.registry_mut().register_fn("fail", |_, _| {
            Err(EditorError::Validation("nope".to_string()))
        });

        engine.execute("add", Params::new()).unwrap();
        engine.execute("fail", Params::new()).unwrap();
        engine.undo().unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![topics::COMMITTED, topics::FAILED, topics::UNDO]
        );
    }

    #[test]
    fn test_params_ext() {
        let mut params = Params::new();
        params.insert("id".to_string(), Value::from("a"));
        params.insert("position".to_string(), Value::Int(2));
        params.insert("bad".to_string(), Value::Int(-1));

        assert_eq!(params.node_id("id").unwrap(), NodeId::from("a"));
        assert_eq!(params.index_or("position", 0).unwrap(), 2);
        assert_eq!(params.index_or("missing", 7).unwrap(), 7);
        assert!(params.index_or("bad", 0).is_err());
        assert!(params.text("position").is_err());
        assert_eq!(params.optional_text("missing").unwrap(), None);
    }
}
