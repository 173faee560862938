use std::fmt::{Debug, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an outbound message. Monotonic per store.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(pub u64);

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Lifecycle of a persisted message. Only `Unstarted` may transition, and
/// only into one of the terminal states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Waiting to be broadcast, or broadcast but not yet confirmed
    #[default]
    Unstarted,
    /// Confirmed on chain
    Completed,
    /// Quarantined because its payload could not be decoded
    Errored,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageState::Unstarted)
    }

    /// Whether a message in `self` may be moved to `next`
    pub fn can_transition_to(&self, next: MessageState) -> bool {
        *self == MessageState::Unstarted && next.is_terminal()
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            MessageState::Unstarted => "unstarted",
            MessageState::Completed => "completed",
            MessageState::Errored => "errored",
        }
    }
}

/// A unit of outbound work, as persisted by the message db
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// bech32 address of the contract the payload executes
    pub contract: String,
    /// protobuf-encoded `MsgExecuteContract`, which carries the sender
    pub payload: Vec<u8>,
    pub state: MessageState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// payload bytes are left out to keep logs readable
impl Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("contract", &self.contract)
            .field("payload_len", &self.payload.len())
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Message {
    pub fn new(id: MessageId, contract: impl Into<String>, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id,
            contract: contract.into(),
            payload,
            state: MessageState::Unstarted,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unstarted_messages_move() {
        use MessageState::*;
        assert!(Unstarted.can_transition_to(Completed));
        assert!(Unstarted.can_transition_to(Errored));
        assert!(!Unstarted.can_transition_to(Unstarted));
        assert!(!Completed.can_transition_to(Unstarted));
        assert!(!Completed.can_transition_to(Errored));
        assert!(!Errored.can_transition_to(Completed));
    }

    #[test]
    fn debug_output_omits_payload_bytes() {
        let message = Message::new(MessageId(4), "contract", vec![0xde, 0xad, 0xbe, 0xef]);
        let printed = format!("{message:?}");
        assert!(printed.contains("payload_len: 4"));
        assert!(!printed.contains("[222"));
    }
}
