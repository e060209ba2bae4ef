//! Combine engine.
//!
//! Runs before an action is queued. Queued actions with the same actor and
//! the same targets may absorb the new action or be absorbed by it,
//! according to the combinators their handlers declare.

use std::sync::Arc;

use tracing::debug;

use actrack_core::descriptor::ActionDescriptor;

use crate::handler::ActionHandler;
use crate::queue::ActionQueue;

/// What happened to an action handed to [`combine_or_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOutcome {
    /// The action was queued after absorbing `absorbed` queued actions.
    Queued { absorbed: usize },
    /// A queued action absorbed the new one, which was not queued.
    CombinedIntoQueued { index: usize },
}

/// Combine `descriptor` with the queue, then queue it unless it was absorbed.
///
/// Entries are scanned from the most recent backward. Only entries with the
/// same actor and targets, bound for the same database, are considered. For
/// each entry:
///
/// 1. if the new action's handler declares a combinator for the entry's verb
///    and it accepts, the entry is merged into the new action and removed
///    from the queue; the scan goes on;
/// 2. otherwise, if the entry's handler declares a combinator for the new
///    verb and it accepts, the new action is merged into the entry and the
///    scan stops without queueing it.
pub fn combine_or_enqueue(
    queue: &mut ActionQueue,
    handler: Arc<dyn ActionHandler>,
    mut descriptor: ActionDescriptor,
) -> CombineOutcome {
    let mut absorbed = 0;
    let mut index = queue.len();

    while index > 0 {
        index -= 1;

        let entry = match queue.at(index) {
            Some(entry)
                if entry.descriptor.actor == descriptor.actor
                    && entry.descriptor.actor.db == descriptor.actor.db
                    && entry.descriptor.targets == descriptor.targets =>
            {
                entry
            }
            _ => continue,
        };

        let absorbs_entry = handler
            .combinator(&entry.descriptor.verb)
            .is_some_and(|combine| combine(&descriptor, &entry.descriptor));
        if absorbs_entry {
            if let Some(entry) = queue.remove_at(index) {
                debug!(
                    verb = %descriptor.verb,
                    absorbed = %entry.descriptor.verb,
                    "Queued action combined into new action"
                );
                descriptor.absorb(&entry.descriptor);
                absorbed += 1;
            }
            continue;
        }

        let absorbed_by_entry = entry
            .handler
            .combinator(&descriptor.verb)
            .is_some_and(|combine| combine(&entry.descriptor, &descriptor));
        if absorbed_by_entry {
            if let Some(entry) = queue.at_mut(index) {
                debug!(
                    verb = %descriptor.verb,
                    into = %entry.descriptor.verb,
                    "New action combined into queued action"
                );
                entry.descriptor.absorb(&descriptor);
            }
            return CombineOutcome::CombinedIntoQueued { index };
        }
    }

    queue.enqueue(handler, descriptor);
    CombineOutcome::Queued { absorbed }
}
