//! C3: in-process chat metadata cache.
//!
//! Chat identifiers, display names and participant lists rarely change
//! mid-session, so handlers and the watcher look them up through here
//! instead of re-querying the database on every message. Entries are
//! populated lazily on first access and never evicted (§4.3): a chat that
//! is renamed mid-run keeps serving its stale name until the process
//! restarts, which is an accepted tradeoff, not a bug.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::models::ChatInfo;
use crate::store::Store;

pub struct ChatCache {
    entries: Mutex<HashMap<i64, ChatInfo>>,
}

impl ChatCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached [`ChatInfo`] for `chat_id`, populating it from
    /// `store` on a miss. The lock is held only long enough to check and
    /// insert; the database query itself runs outside the critical section.
    pub fn get_or_fetch(&self, store: &Store, chat_id: i64) -> Result<ChatInfo, StoreError> {
        if let Some(info) = self.entries.lock().unwrap().get(&chat_id) {
            return Ok(info.clone());
        }
        let info = store
            .chat_info(chat_id)?
            .ok_or(StoreError::ChatNotFound(chat_id))?;
        self.entries.lock().unwrap().insert(chat_id, info.clone());
        Ok(info)
    }

    /// Drop a single cached entry, forcing the next lookup to re-fetch it.
    /// Not exercised by any handler today but kept for tests that need to
    /// assert cache-miss behaviour after a simulated rename.
    #[cfg(test)]
    pub fn invalidate(&self, chat_id: i64) {
        self.entries.lock().unwrap().remove(&chat_id);
    }
}

impl Default for ChatCache {
    fn default() -> Self {
        Self::new()
    }
}
