//! # Transaction Log
//!
//! Groups changes into transactions and keeps the undo/redo history.
//!
//! ## Design
//!
//! - `begin` increments a nesting depth; only the outermost `begin`/`commit`
//!   pair produces an undo entry, inner pairs merge into the outer one
//! - `rollback` hands back the changes recorded since the matching `begin`
//!   so the document can revert them in reverse order
//! - A new commit clears the redo stack
//! - The undo stack is bounded; the oldest entry is evicted first
//!
//! The log never touches the node arena. The document applies changes and
//! reports them here; undo/redo take entries out, replay them, and hand them
//! back.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut log = TransactionLog::new();
//!
//! log.begin(Some("Rename".to_string()));
//! log.record(change);
//! log.commit()?;
//!
//! let entry = log.take_undo().unwrap();
//! // ... document applies the inverses ...
//! log.push_redo(entry);
//! ```

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

use crate::{Change, EditorError, EditorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Committed,
    RolledBack,
}

/// The transaction currently being built
#[derive(Debug, Clone)]
pub struct Transaction {
    pub label: Option<String>,
    pub changes: Vec<Change>,
    pub depth: usize,
    pub status: TransactionStatus,
    /// Change count at each nested `begin`
    marks: Vec<usize>,
}

/// A committed transaction on the undo or redo stack
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub label: Option<String>,
    /// Changes in application order
    pub changes: Vec<Change>,
    pub committed_at: DateTime<Utc>,
}

/// Result of `commit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Inner pair closed; changes stay in the outer transaction
    Nested { depth: usize },
    /// Outermost pair closed and pushed as one undo entry
    Committed { changes: usize },
    /// Outermost pair closed with nothing recorded
    Empty,
}

/// Undo/redo history for one document
#[derive(Debug)]
pub struct TransactionLog {
    /// Committed entries (most recent last)
    undo_stack: VecDeque<HistoryEntry>,

    /// Undone entries (most recent last)
    redo_stack: Vec<HistoryEntry>,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,

    current: Option<Transaction>,

    /// Status of the most recently closed transaction
    last_status: Option<TransactionStatus>,

    /// Whether history moved since the last save
    dirty: bool,
}

impl TransactionLog {
    /// Create a log with default max levels (100)
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_levels,
            current: None,
            last_status: None,
            dirty: false,
        }
    }

    /// Open a transaction, or nest inside the open one. Returns the new depth.
    pub fn begin(&mut self, label: Option<String>) -> usize {
        match &mut self.current {
            Some(tx) => {
                tx.marks.push(tx.changes.len());
                tx.depth += 1;
                if let Some(inner) = label {
                    debug!(outer = ?tx.label, inner = %inner, depth = tx.depth, "Nested transaction merges into outer");
                }
                tx.depth
            }
            None => {
                self.current = Some(Transaction {
                    label,
                    changes: Vec::new(),
                    depth: 1,
                    status: TransactionStatus::Open,
                    marks: Vec::new(),
                });
                1
            }
        }
    }

    /// Append a change to the open transaction. Returns false if none is open.
    pub fn record(&mut self, change: Change) -> bool {
        match &mut self.current {
            Some(tx) => {
                tx.changes.push(change);
                true
            }
            None => false,
        }
    }

    pub fn commit(&mut self) -> EditorResult<CommitOutcome> {
        let tx = self.current.as_mut().ok_or_else(no_open_transaction)?;

        if tx.depth > 1 {
            tx.depth -= 1;
            tx.marks.pop();
            return Ok(CommitOutcome::Nested { depth: tx.depth });
        }

        let Some(mut tx) = self.current.take() else {
            return Err(no_open_transaction());
        };
        tx.status = TransactionStatus::Committed;
        self.last_status = Some(tx.status);

        if tx.changes.is_empty() {
            return Ok(CommitOutcome::Empty);
        }

        let count = tx.changes.len();
        self.push_entry(HistoryEntry {
            label: tx.label,
            changes: tx.changes,
            committed_at: Utc::now(),
        });
        Ok(CommitOutcome::Committed { changes: count })
    }

    /// Discard the changes recorded since the matching `begin` and return
    /// them in recorded order. The caller reverts them in reverse order.
    pub fn rollback(&mut self) -> EditorResult<Vec<Change>> {
        let tx = self.current.as_mut().ok_or_else(no_open_transaction)?;

        if tx.depth > 1 {
            let mark = match tx.marks.pop() {
                Some(mark) if mark <= tx.changes.len() => mark,
                other => {
                    return Err(EditorError::Consistency(format!(
                        "no valid rollback mark at depth {} (found {:?})",
                        tx.depth, other
                    )))
                }
            };
            tx.depth -= 1;
            return Ok(tx.changes.split_off(mark));
        }

        let Some(mut tx) = self.current.take() else {
            return Err(no_open_transaction());
        };
        tx.status = TransactionStatus::RolledBack;
        self.last_status = Some(tx.status);
        Ok(tx.changes)
    }

    fn push_entry(&mut self, entry: HistoryEntry) {
        self.undo_stack.push_back(entry);

        // Trim if exceeded max levels
        if self.max_levels > 0 {
            while self.undo_stack.len() > self.max_levels {
                if let Some(evicted) = self.undo_stack.pop_front() {
                    debug!(label = ?evicted.label, "Evicted oldest undo entry");
                }
            }
        }

        // New action invalidates forward history
        self.redo_stack.clear();
        self.dirty = true;
    }

    /// Pop the most recent undo entry
    pub fn take_undo(&mut self) -> Option<HistoryEntry> {
        self.undo_stack.pop_back()
    }

    /// Pop the most recently undone entry
    pub fn take_redo(&mut self) -> Option<HistoryEntry> {
        self.redo_stack.pop()
    }

    /// Finish an undo: the reverted entry becomes redoable
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo_stack.push(entry);
        self.dirty = true;
    }

    /// Finish a redo: the reapplied entry goes back on the undo stack
    /// without clearing the remaining redo entries
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        self.undo_stack.push_back(entry);
        self.dirty = true;
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Current nesting depth (0 when no transaction is open)
    pub fn depth(&self) -> usize {
        self.current.as_ref().map(|tx| tx.depth).unwrap_or(0)
    }

    pub fn current(&self) -> Option<&Transaction> {
        self.current.as_ref()
    }

    /// Status of the open transaction, or of the last one closed
    pub fn status(&self) -> Option<TransactionStatus> {
        self.current
            .as_ref()
            .map(|tx| tx.status)
            .or(self.last_status)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Label of the next undo operation
    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack
            .back()
            .and_then(|entry| entry.label.as_deref())
    }

    /// Label of the next redo operation
    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack
            .last()
            .and_then(|entry| entry.label.as_deref())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Clear all undo/redo history. An open transaction is kept.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

fn no_open_transaction() -> EditorError {
    EditorError::Validation("no open transaction".to_string())
}
