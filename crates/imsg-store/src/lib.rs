//! Read-only access to the macOS Messages (`chat.db`) SQLite database.
//!
//! This crate owns C1 (Apple-epoch & body decoding), C2 (the message store
//! itself) and C3 (the in-process chat cache). It never writes to the
//! database; the OS and Messages.app remain the sole writers.

pub mod cache;
mod epoch;
mod error;
pub mod models;
mod store;

pub use cache::ChatCache;
pub use epoch::{apple_time_to_utc, decode_attributed_body};
pub use error::StoreError;
pub use models::{Attachment, Chat, ChatInfo, Message, Reaction, ReactionKind};
pub use store::Store;
