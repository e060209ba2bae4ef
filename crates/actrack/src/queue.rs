//! Pending-action queue.
//!
//! Holds the actions logged in one session until they are flushed. A queue
//! belongs to exactly one session and is never shared between threads.

use std::sync::Arc;

use actrack_core::descriptor::ActionDescriptor;

use crate::handler::ActionHandler;

/// A logged action waiting for the flush, with its resolved handler.
#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub handler: Arc<dyn ActionHandler>,
    pub descriptor: ActionDescriptor,
}

/// Ordered list of pending actions, oldest first.
#[derive(Debug, Default)]
pub struct ActionQueue {
    entries: Vec<QueuedAction>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action. No deduplication happens here.
    pub fn enqueue(&mut self, handler: Arc<dyn ActionHandler>, descriptor: ActionDescriptor) {
        self.entries.push(QueuedAction {
            handler,
            descriptor,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&QueuedAction> {
        self.entries.get(index)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut QueuedAction> {
        self.entries.get_mut(index)
    }

    /// Remove and return the entry at `index`, shifting later entries.
    pub fn remove_at(&mut self, index: usize) -> Option<QueuedAction> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedAction> {
        self.entries.iter()
    }

    /// Take every entry, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<QueuedAction> {
        std::mem::take(&mut self.entries)
    }
}
