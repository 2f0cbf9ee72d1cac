//! Polling message watcher (C4) and subscription filter (C5).

mod filter;
mod watcher;

pub use filter::{Filter, FilterError};
pub use watcher::{Watcher, WatcherConfig};
