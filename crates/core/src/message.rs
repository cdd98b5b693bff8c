use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::id::Participant;

/// A unit of content exchanged between agents, or returned to the caller.
///
/// Messages are immutable once created. Their sequence numbers are
/// assigned by the task that created them and increase monotonically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    seq: u64,
    sender: Participant,
    recipient: Participant,
    content: String,
}

impl Message {
    /// Returns the task-scoped sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the sender.
    #[inline]
    pub fn sender(&self) -> &Participant {
        &self.sender
    }

    /// Returns the recipient.
    #[inline]
    pub fn recipient(&self) -> &Participant {
        &self.recipient
    }

    /// Returns the content.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Hands out task-scoped message sequence numbers, starting at 1.
#[derive(Debug, Default)]
pub(crate) struct MessageSequencer {
    last: AtomicU64,
}

impl MessageSequencer {
    pub fn next_message<S: Into<String>>(
        &self,
        sender: Participant,
        recipient: Participant,
        content: S,
    ) -> Message {
        let seq = self.last.fetch_add(1, Ordering::Relaxed) + 1;
        Message {
            seq,
            sender,
            recipient,
            content: content.into(),
        }
    }
}
