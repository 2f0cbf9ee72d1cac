//! C8: the subscription table. Allocates subscription ids, tracks the
//! cancellation token for each active worker, and cancels on unsubscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Subscription ids are a counter independent of client request ids (§9):
/// clients must treat them as opaque.
pub struct SubscriptionManager {
    next_id: AtomicU64,
    tokens: Mutex<HashMap<u64, CancellationToken>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next subscription id and register its cancellation
    /// token. The caller is responsible for spawning the worker that
    /// observes `token`.
    pub async fn allocate(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        self.tokens.lock().await.insert(id, token.clone());
        (id, token)
    }

    /// Cancel and remove a subscription. Always succeeds, even for an
    /// unknown id, matching the idempotent-unsubscribe property.
    pub async fn unsubscribe(&self, id: u64) {
        if let Some(token) = self.tokens.lock().await.remove(&id) {
            token.cancel();
        }
    }

    /// Cancel every active subscription, used on reader EOF / shutdown.
    pub async fn cancel_all(&self) {
        for (_, token) in self.tokens.lock().await.drain() {
            token.cancel();
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
