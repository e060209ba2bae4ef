//! Recorder and request-scoped sessions.
//!
//! The [`Recorder`] holds what every session shares: the handler registry,
//! the configuration and the stores. A [`Session`] owns one pending-action
//! queue; `log` feeds it through the combine engine and `flush` drains it
//! through the group engine.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use actrack_core::config::ActrackConfig;
use actrack_core::descriptor::{normalize, LogFields};
use actrack_core::error::Result;
use actrack_core::store::ActionStore;
use actrack_core::types::{ActionId, EntityRef};
use actrack_storage::StoreRouter;

use crate::combine::{combine_or_enqueue, CombineOutcome};
use crate::error::FlushFailure;
use crate::group::{group_or_create, GroupOutcome};
use crate::handler::HandlerRegistry;
use crate::queue::ActionQueue;

/// Shared entry point for logging actions.
#[derive(Debug)]
pub struct Recorder<S> {
    registry: Arc<HandlerRegistry>,
    config: Arc<ActrackConfig>,
    stores: StoreRouter<S>,
}

impl<S: ActionStore> Recorder<S> {
    pub fn new(registry: Arc<HandlerRegistry>, config: Arc<ActrackConfig>, stores: StoreRouter<S>) -> Self {
        Self {
            registry,
            config,
            stores,
        }
    }

    /// Start a session with an empty queue, e.g. at the start of a request.
    pub fn session(&self) -> Session<'_, S> {
        Session {
            recorder: self,
            queue: ActionQueue::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ActrackConfig {
        &self.config
    }

    pub fn stores(&self) -> &StoreRouter<S> {
        &self.stores
    }
}

/// Summary of a flush.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    /// Actions persisted as new records.
    pub created: Vec<ActionId>,
    /// Number of actions merged into a later action of the same flush.
    pub grouped_into_sibling: usize,
    /// Stored actions extended by this flush, once per merged action.
    pub grouped_into_stored: Vec<ActionId>,
    pub failures: Vec<FlushFailure>,
}

impl FlushReport {
    /// Number of drained actions.
    pub fn processed(&self) -> usize {
        self.created.len()
            + self.grouped_into_sibling
            + self.grouped_into_stored.len()
            + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One queue of pending actions, scoped to a request or a unit of work.
///
/// Actions still queued when the session is dropped are lost.
#[derive(Debug)]
pub struct Session<'r, S> {
    recorder: &'r Recorder<S>,
    queue: ActionQueue,
}

impl<'r, S: ActionStore> Session<'r, S> {
    /// Log an action.
    ///
    /// Malformed fields are rejected here; nothing is written before
    /// [`Session::flush`].
    pub fn log(&mut self, actor: EntityRef, verb: &str, fields: &LogFields) -> Result<CombineOutcome> {
        let handler = self.recorder.registry.resolve(verb);
        let level = self.recorder.registry.default_level(handler.as_ref());
        let config = &self.recorder.config;
        let resolve_level = |name: &str| config.resolve_level(name);
        let descriptor = normalize(actor, verb, fields, Utc::now(), level, &resolve_level)?;

        let outcome = combine_or_enqueue(&mut self.queue, handler, descriptor);
        debug!(verb = %verb, outcome = ?outcome, pending = self.queue.len(), "Action logged");
        Ok(outcome)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Group or persist every queued action, leaving the queue empty.
    ///
    /// A failing action is reported and does not stop the others.
    pub fn flush(&mut self) -> FlushReport {
        let window = self.recorder.config.grouping_window();
        let mut entries = self.queue.drain();
        let mut report = FlushReport::default();

        for index in 0..entries.len() {
            let (current, siblings) = match entries[index..].split_first_mut() {
                Some(split) => split,
                None => break,
            };

            let outcome = self
                .recorder
                .stores
                .route_entity(&current.descriptor.actor)
                .and_then(|store| {
                    group_or_create(
                        store,
                        current.handler.as_ref(),
                        &current.descriptor,
                        siblings,
                        window,
                    )
                });

            match outcome {
                Ok(GroupOutcome::PersistedNew(id)) => report.created.push(id),
                Ok(GroupOutcome::GroupedIntoStored(id)) => report.grouped_into_stored.push(id),
                Ok(GroupOutcome::GroupedIntoSibling(_)) => report.grouped_into_sibling += 1,
                Err(e) => {
                    warn!(
                        verb = %current.descriptor.verb,
                        actor = %current.descriptor.actor,
                        error = %e,
                        "Failed to flush action"
                    );
                    report.failures.push(FlushFailure::new(
                        current.descriptor.verb.clone(),
                        current.descriptor.actor.clone(),
                        &e,
                    ));
                }
            }
        }

        if report.processed() > 0 {
            info!(
                created = report.created.len(),
                grouped = report.grouped_into_sibling + report.grouped_into_stored.len(),
                failed = report.failures.len(),
                "Session flushed"
            );
        }
        report
    }
}

/// Something actions can be logged into.
///
/// Lets services such as tracking log their own actions into whatever
/// session the caller holds.
pub trait ActionLog {
    fn log(&mut self, actor: EntityRef, verb: &str, fields: &LogFields) -> Result<CombineOutcome>;
}

impl<S: ActionStore> ActionLog for Session<'_, S> {
    fn log(&mut self, actor: EntityRef, verb: &str, fields: &LogFields) -> Result<CombineOutcome> {
        Session::log(self, actor, verb, fields)
    }
}

impl<S> Drop for Session<'_, S> {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            warn!(pending = self.queue.len(), "Session dropped with unflushed actions");
        }
    }
}
