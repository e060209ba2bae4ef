//! Activity tracking engine.
//!
//! Actions are logged into a [`Session`], combined with the pending ones as
//! they arrive, then grouped with similar actions and persisted on flush.
//! [`TrackingService`] lets users follow entities and read their feed.

pub mod combine;
pub mod error;
pub mod group;
pub mod handler;
pub mod queue;
pub mod recorder;
pub mod tracking;

pub use combine::{combine_or_enqueue, CombineOutcome};
pub use error::FlushFailure;
pub use group::{
    default_group_predicate, differing_attrs, effective_window, group_or_create, sibling_matches,
    GroupOutcome, ManyValued,
};
pub use handler::{ActionHandler, Combinator, DefaultHandler, GroupPredicate, HandlerRegistry, VerbHandler};
pub use queue::{ActionQueue, QueuedAction};
pub use recorder::{ActionLog, FlushReport, Recorder, Session};
pub use tracking::{TrackOptions, TrackingService, UntrackOptions, STARTED_TRACKING, STOPPED_TRACKING};
