//! Actrack storage crate - SQLite persistence for actions, trackers and
//! unread state.
//!
//! Provides a WAL-mode SQLite database with migrations, the
//! [`ActionRepository`] implementing the core `ActionStore` adapter, and the
//! tracker and unread repositories used by feeds. [`StoreRouter`] maps
//! database aliases to stores.

mod codec;
pub mod db;
pub mod migrations;
pub mod repository;
pub mod router;
pub mod trackers;
pub mod unread;

pub use db::Database;
pub use repository::ActionRepository;
pub use router::{resolve_db_alias, StoreRouter, DEFAULT_ALIAS};
pub use trackers::TrackerRepository;
pub use unread::UnreadRepository;
