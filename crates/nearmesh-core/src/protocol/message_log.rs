//! Delivered-message log
//!
//! Append-only, ordered by local arrival or origination (not by message timestamp).

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::protocol::envelope::{Message, MessageId};
use crate::types::{DeviceId, EndpointId};

/// Who authored a logged message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Author {
    Local,
    Remote(DeviceId),
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Author::Local => f.write_str("me"),
            Author::Remote(origin) => write!(f, "{origin}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the local log, starting at 0
    pub seq: u64,
    pub author: Author,
    pub message: Message,
    /// Link the message arrived on; `None` for local messages
    pub received_from: Option<EndpointId>,
}

impl LogEntry {
    pub fn id(&self) -> MessageId {
        self.message.id()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.author, Author::Local)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.message.timestamp, self.author, self.message.info_level, self.message.body
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        author: Author,
        message: Message,
        received_from: Option<EndpointId>,
    ) -> &LogEntry {
        let entry = LogEntry {
            seq: self.entries.len() as u64,
            author,
            message,
            received_from,
        };
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// How many entries carry `id`
    pub fn count_of(&self, id: &MessageId) -> usize {
        self.entries.iter().filter(|entry| entry.id() == *id).count()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    #[test]
    fn test_append_assigns_sequence_in_arrival_order() {
        let mut log = MessageLog::new();
        let late = Message::new(DeviceId::from("B"), Timestamp::new(2000), "normal", "late");
        let early = Message::new(DeviceId::from("A"), Timestamp::new(1000), "normal", "early");

        log.append(Author::Remote(DeviceId::from("B")), late, Some(EndpointId::from("ep-b")));
        log.append(Author::Local, early.clone(), None);

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].seq, 0);
        assert_eq!(log.entries()[1].seq, 1);
        assert_eq!(log.last().map(|e| e.message.body.as_str()), Some("early"));
        assert!(log.entries()[1].is_local());
        assert_eq!(log.count_of(&early.id()), 1);
    }

    #[test]
    fn test_author_display() {
        assert_eq!(Author::Local.to_string(), "me");
        assert_eq!(Author::Remote(DeviceId::from("Pixel 7")).to_string(), "Pixel 7");
    }
}
