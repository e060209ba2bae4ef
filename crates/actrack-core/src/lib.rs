//! Core types for the activity tracker: entity references, tagged data
//! values, pending action descriptors, the persistence adapter contract,
//! configuration and errors.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod store;
pub mod types;
pub mod value;

pub use config::{ActrackConfig, GroupingWindow, MAX_GROUPING_DELAY_SECS};
pub use descriptor::{classify_field, normalize, ActionDescriptor, FieldKind, FieldValue, LogFields};
pub use error::{ActrackError, Result};
pub use store::{ActionRecord, ActionStore, NewAction, RecordUpdate, Tracker};
pub use types::*;
pub use value::{merge_data, DataMap, DataValue, Scalar};
