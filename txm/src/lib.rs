//! Durable transaction manager for CosmWasm chains.
//!
//! Messages are persisted as `Unstarted`, grouped by sender on every dispatch
//! cycle, signed and broadcast as one transaction per sender, and marked
//! `Completed` only once the transaction hash is found on chain. Anything not
//! confirmed stays `Unstarted` and is retried on the next cycle, so delivery
//! is at-least-once.

#![deny(clippy::unwrap_used, clippy::panic)]

pub use chain::{
    BroadcastMode, ChainClient, ChainError, ChainResult, GasPrice, SenderAccount, TxFilter,
    TxHash, TxRecord,
};
pub use decode::{DecodeError, ExecuteContractDecoder, SenderDecoder, EXECUTE_CONTRACT_TYPE_URL};
pub use dispatcher::{
    CycleReport, Dispatcher, DispatcherSettings, DispatcherState, SenderBatch, SenderBatches,
    SenderLocks, TxmMetrics,
};
pub use error::TxmError;
pub use keys::{KeyError, KeyProvider, LocalKeyProvider, Secp256k1Signer, TxSigner};
pub use message::{Message, MessageDb, MessageId, MessageState};
pub use notify::{EventBroadcaster, LocalEventBroadcaster, NotifyError, Subscription};
pub use settings::{TxmSettings, DEFAULT_NOTIFICATION_CHANNEL, ENV_PREFIX};
pub use self::txm::{ServiceState, Txm, TxmDeps};

mod chain;
mod decode;
mod dispatcher;
mod error;
mod keys;
mod message;
mod notify;
mod settings;
mod txm;
