use txm_base::db::DbError;

use crate::chain::{ChainError, TxHash};
use crate::decode::DecodeError;
use crate::keys::KeyError;
use crate::message::MessageId;
use crate::notify::NotifyError;

#[derive(Debug, thiserror::Error)]
pub enum TxmError {
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),
    #[error("Failed to decode payload of message {id}: {source}")]
    Decode {
        id: MessageId,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("Chain client error: {0}")]
    Chain(#[from] ChainError),
    #[error("Confirmation of transaction {hash} is ambiguous ({matches} matching transactions)")]
    ConfirmationAmbiguous { hash: TxHash, matches: usize },
    #[error("Transaction manager was already started")]
    AlreadyStarted,
    #[error("Transaction manager is not started")]
    NotStarted,
    #[error("Transaction manager was already stopped")]
    AlreadyStopped,
    #[error("Failed to subscribe to notification channel {channel}: {source}")]
    Subscription {
        channel: String,
        #[source]
        source: NotifyError,
    },
}

impl TxmError {
    /// Short, stable label used for logs and metrics
    pub fn to_metrics_label(&self) -> &'static str {
        match self {
            TxmError::StoreUnavailable(_) => "store_unavailable",
            TxmError::Decode { .. } => "decode",
            TxmError::Key(KeyError::KeyNotFound(_)) => "key_not_found",
            TxmError::Key(_) => "key",
            TxmError::Chain(_) => "chain",
            TxmError::ConfirmationAmbiguous { .. } => "confirmation_ambiguous",
            TxmError::AlreadyStarted => "already_started",
            TxmError::NotStarted => "not_started",
            TxmError::AlreadyStopped => "already_stopped",
            TxmError::Subscription { .. } => "subscription",
        }
    }
}
