//! C4: polls the message store for rows past a watermark and streams them
//! out, backing off exponentially when the store is quiet.

use std::time::Duration;

use imsg_store::{Message, Store};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub batch_size: i64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            batch_size: 200,
        }
    }
}

/// A single-consumer stream of messages observed past `since_rowid`,
/// optionally restricted to one chat.
pub struct Watcher {
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    /// Spawn the polling loop and return the receiving half of its channel.
    /// The loop exits promptly once `cancel` fires, at any suspension point,
    /// without emitting further messages.
    pub fn subscribe(
        &self,
        store: std::sync::Arc<Store>,
        chat_id_filter: i64,
        since_rowid: i64,
        include_extras: bool,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Message> {
        let config = self.config;
        let (tx, rx) = mpsc::channel(config.batch_size as usize);

        tokio::spawn(async move {
            let mut watermark = since_rowid;
            let mut interval = config.min_interval;

            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("watcher cancelled");
                        return;
                    }
                    result = tokio::task::spawn_blocking({
                        let store = store.clone();
                        move || {
                            store.messages_after(
                                watermark,
                                chat_id_filter,
                                config.batch_size,
                                include_extras,
                            )
                        }
                    }) => result,
                };

                let messages = match batch {
                    Ok(Ok(messages)) => messages,
                    Ok(Err(err)) => {
                        warn!(error = %err, "watcher poll failed, backing off");
                        Vec::new()
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "watcher poll task panicked");
                        Vec::new()
                    }
                };

                if messages.is_empty() {
                    interval = (interval * 2).min(config.max_interval);
                } else {
                    for message in messages {
                        watermark = watermark.max(message.id);
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            send = tx.send(message) => {
                                if send.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    interval = config.min_interval;
                    continue;
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep_until(Instant::now() + interval) => {}
                }
            }
        });

        rx
    }
}
