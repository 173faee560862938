//! The boundary to the chain RPC client.
//!
//! The dispatcher performs no RPC itself: everything that talks to a node goes
//! through [`ChainClient`], which may be arbitrarily slow or fail at any call.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use async_trait::async_trait;
use cosmrs::{AccountId, Any};
use serde::{Deserialize, Serialize};

use crate::keys::TxSigner;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// The node could not be reached or did not answer
    #[error("Chain unavailable: {0}")]
    Unavailable(String),
    /// The node answered but refused the transaction (check or simulation failure)
    #[error("Transaction rejected with code {code}: {log}")]
    Rejected { code: u32, log: String },
    #[error("{0}")]
    Other(String),
}

/// Price per unit of gas, as quoted by the chain client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasPrice {
    pub amount: f64,
    pub denom: String,
}

/// On-chain account data needed to sign for a sender. Always fetched fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderAccount {
    pub account_number: u64,
    pub sequence: u64,
}

/// Upper-case hex transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&[u8]> for TxHash {
    fn from(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(bytes))
    }
}

/// How long `sign_and_broadcast` waits for the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Wait for the node's acceptance response
    #[default]
    Block,
    /// Wait for the mempool check only
    Sync,
    /// Return immediately
    Async,
}

/// Tendermint tx search query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFilter {
    query: String,
}

impl TxFilter {
    /// Matches the transaction with exactly this hash
    pub fn hash(hash: &TxHash) -> Self {
        Self {
            query: format!("tx.hash='{}'", hash),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

/// A transaction as returned by a tx search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub hash: TxHash,
    pub height: u64,
    /// ABCI result code, 0 on success
    pub code: u32,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current gas price
    async fn gas_price(&self) -> ChainResult<GasPrice>;

    /// Account number and next sequence of `address`
    async fn account(&self, address: &AccountId) -> ChainResult<SenderAccount>;

    /// Sign `msgs` as a single transaction and broadcast it
    async fn sign_and_broadcast(
        &self,
        msgs: Vec<Any>,
        account: SenderAccount,
        gas_price: GasPrice,
        signer: Arc<dyn TxSigner>,
        mode: BroadcastMode,
    ) -> ChainResult<TxHash>;

    /// Indexed transactions matching `filter`
    async fn find_transactions(&self, filter: &TxFilter) -> ChainResult<Vec<TxRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_filter_uses_tendermint_query_syntax() {
        let hash = TxHash::from([0xab, 0x01].as_slice());
        assert_eq!(hash.0, "AB01");
        assert_eq!(TxFilter::hash(&hash).query(), "tx.hash='AB01'");
    }
}
