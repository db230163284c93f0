//! Hook points around binding writes.
//!
//! A [`WriteGuard`] is consulted before a write reaches the data cell and may veto it.
//! A [`MutationListener`] is told about every write that went through; it is the
//! channel a session or validation service listens on. Listener failures are logged
//! and never undo the write.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use super::BindingError;
use crate::{ElementKey, Result, cell::CellEdit};

/// Indicates whether a write originated locally or from a remote merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteSource {
    /// Write made by local application code
    Local,
    /// Write made while a remote refresh of the same cell is being applied
    Remote,
}

/// What a [`WriteGuard`] gets to see about a pending write.
#[derive(Debug, Clone)]
pub struct WriteContext {
    /// The cell about to be written
    pub key: ElementKey,
    /// Where the write originates
    pub source: WriteSource,
}

/// External permission check for binding writes.
///
/// Returning `false` drops the write. The caller is not told; the engine logs a
/// warning and moves on.
pub trait WriteGuard: Send + Sync {
    fn permits(&self, context: &WriteContext) -> bool;
}

impl<F> WriteGuard for F
where
    F: Fn(&WriteContext) -> bool + Send + Sync,
{
    fn permits(&self, context: &WriteContext) -> bool {
        self(context)
    }
}

/// Description of a write that was applied to a data cell.
#[derive(Debug, Clone, Serialize)]
pub struct MutationEvent {
    /// The cell that was written
    pub key: ElementKey,
    /// Edits applied, in order
    pub change: Vec<CellEdit>,
    /// Where the write originated
    pub source: WriteSource,
}

/// Receives a [`MutationEvent`] after every successful binding write.
pub trait MutationListener: Send + Sync {
    /// Called after the write has been applied to the document.
    ///
    /// Failures are logged by the engine. The write stays applied.
    fn on_mutation(&self, event: &MutationEvent) -> Result<()>;
}

/// Write guards and mutation listeners registered on one engine.
#[derive(Default)]
pub(crate) struct WriteHooks {
    guards: Vec<Arc<dyn WriteGuard>>,
    listeners: Vec<Arc<dyn MutationListener>>,
}

impl WriteHooks {
    pub(crate) fn add_guard(&mut self, guard: Arc<dyn WriteGuard>) {
        self.guards.push(guard);
    }

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn MutationListener>) {
        self.listeners.push(listener);
    }

    /// Whether every guard permits the write.
    pub(crate) fn permits(&self, context: &WriteContext) -> bool {
        self.guards.iter().all(|guard| guard.permits(context))
    }

    /// Tell every listener about `event`. Returns the number of listeners that failed.
    pub(crate) fn notify(&self, event: &MutationEvent) -> usize {
        let mut failures = 0;
        for listener in &self.listeners {
            if let Err(e) = listener.on_mutation(event) {
                tracing::error!(key = %event.key, "Mutation listener failed: {e}");
                failures += 1;
            }
        }
        failures
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Listener that forwards events over a tokio channel.
///
/// Uses `try_send` since it runs inside the write path; a full or closed channel
/// loses the event and reports an error.
pub struct ChannelMutationListener {
    tx: mpsc::Sender<MutationEvent>,
}

impl ChannelMutationListener {
    pub fn new(tx: mpsc::Sender<MutationEvent>) -> Self {
        Self { tx }
    }

    /// A listener together with the receiving end of a channel of `capacity`.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MutationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl MutationListener for ChannelMutationListener {
    fn on_mutation(&self, event: &MutationEvent) -> Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| {
            BindingError::ListenerUnavailable {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
