//! C10: trait seams for the platform-bound collaborators that actually send
//! messages and look up contacts. The real implementations are
//! AppleScript/address-book-backed and out of scope; only in-memory test
//! doubles ship here.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub to: Option<String>,
    pub chat_identifier: Option<String>,
    pub chat_guid: Option<String>,
    pub text: Option<String>,
    pub file: Option<String>,
    pub service: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct SendReactionOptions {
    pub target_guid: String,
    pub reaction: imsg_store::ReactionKind,
    pub emoji: String,
    pub chat_identifier: Option<String>,
    pub chat_guid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Contact {
    pub handle: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("contacts unavailable")]
    Unauthorized,
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, opts: SendOptions) -> Result<(), SendError>;
    async fn send_reaction(&self, opts: SendReactionOptions) -> Result<(), SendError>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Contact>, ContactError>;
    async fn resolve(&self, handles: &[String]) -> Result<Vec<Contact>, ContactError>;
}

/// Accepts every send without touching any platform API. Used by handler
/// tests so `send`/`reactions.send` can be exercised without macOS.
#[derive(Default)]
pub struct NullMessageSender {
    pub sent: Mutex<Vec<SendOptions>>,
    pub reactions_sent: Mutex<Vec<SendReactionOptions>>,
}

#[async_trait]
impl MessageSender for NullMessageSender {
    async fn send(&self, opts: SendOptions) -> Result<(), SendError> {
        self.sent.lock().await.push(opts);
        Ok(())
    }

    async fn send_reaction(&self, opts: SendReactionOptions) -> Result<(), SendError> {
        self.reactions_sent.lock().await.push(opts);
        Ok(())
    }
}

/// A fixed in-memory contact list, for handler tests.
pub struct StubContactDirectory {
    contacts: Vec<Contact>,
    pub authorized: bool,
}

impl StubContactDirectory {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self {
            contacts,
            authorized: true,
        }
    }
}

#[async_trait]
impl ContactDirectory for StubContactDirectory {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Contact>, ContactError> {
        if !self.authorized {
            return Err(ContactError::Unauthorized);
        }
        let query = query.to_lowercase();
        Ok(self
            .contacts
            .iter()
            .filter(|c| c.display_name.to_lowercase().contains(&query) || c.handle.contains(&query))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn resolve(&self, handles: &[String]) -> Result<Vec<Contact>, ContactError> {
        if !self.authorized {
            return Err(ContactError::Unauthorized);
        }
        Ok(self
            .contacts
            .iter()
            .filter(|c| handles.contains(&c.handle))
            .cloned()
            .collect())
    }
}
