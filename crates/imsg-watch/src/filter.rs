//! C5: participant/time-window predicate applied to messages.

use chrono::{DateTime, Utc};
use imsg_store::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid ISO-8601 timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A total predicate over messages, built once at subscribe/history time.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    participants: Vec<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn new(
        participants: Vec<String>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self, FilterError> {
        Ok(Self {
            participants,
            start: start.map(parse_iso8601).transpose()?,
            end: end.map(parse_iso8601).transpose()?,
        })
    }

    pub fn matches(&self, message: &Message) -> bool {
        if !self.participants.is_empty() && !self.participants.iter().any(|p| p == &message.sender)
        {
            return false;
        }
        if let Some(start) = self.start
            && message.created_at < start
        {
            return false;
        }
        if let Some(end) = self.end
            && message.created_at > end
        {
            return false;
        }
        true
    }
}

fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, FilterError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| FilterError::InvalidTimestamp(s.to_string()))
}
