use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use cosmrs::AccountId;
use dashmap::DashMap;
use k256::ecdsa::{signature::Signer, Signature, SigningKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use tracing::info;

#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("No signing key found for {0}")]
    KeyNotFound(String),
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Signing capability for one account. Implementations never expose the
/// secret; software and hardware backed keys are interchangeable.
pub trait TxSigner: Send + Sync + Debug {
    /// Sign the serialized sign doc
    fn sign(&self, sign_doc: &[u8]) -> Result<Vec<u8>, KeyError>;

    /// SEC1 compressed public key
    fn public_key(&self) -> Vec<u8>;
}

#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Signing capability for `address`, or [`KeyError::KeyNotFound`]
    async fn resolve_key(&self, address: &AccountId) -> Result<Arc<dyn TxSigner>, KeyError>;
}

/// In-memory secp256k1 key
pub struct Secp256k1Signer {
    key: SigningKey,
}

impl Secp256k1Signer {
    pub fn from_slice(secret: &[u8]) -> Result<Self, KeyError> {
        let key = SigningKey::from_slice(secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Cosmos SDK account address of this key: RIPEMD160(SHA256(pubkey))
    pub fn account_id(&self, prefix: &str) -> Result<AccountId, KeyError> {
        let sha = Sha256::digest(self.public_key());
        let hash = Ripemd160::digest(sha);
        AccountId::new(prefix, hash.as_slice()).map_err(|e| KeyError::InvalidKey(e.to_string()))
    }
}

impl Debug for Secp256k1Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Signer")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl TxSigner for Secp256k1Signer {
    fn sign(&self, sign_doc: &[u8]) -> Result<Vec<u8>, KeyError> {
        let signature: Signature = self
            .key
            .try_sign(sign_doc)
            .map_err(|e| KeyError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }
}

/// Software key provider, keys addressed by their bech32 account id
#[derive(Debug, Default)]
pub struct LocalKeyProvider {
    keys: DashMap<AccountId, Arc<dyn TxSigner>>,
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secp256k1 secret and return the address it signs for
    pub fn add_secp256k1(&self, secret: &[u8], prefix: &str) -> Result<AccountId, KeyError> {
        let signer = Secp256k1Signer::from_slice(secret)?;
        let address = signer.account_id(prefix)?;
        info!(%address, "Registered signing key");
        self.keys.insert(address.clone(), Arc::new(signer));
        Ok(address)
    }

    /// Register an arbitrary signer under `address`
    pub fn insert(&self, address: AccountId, signer: Arc<dyn TxSigner>) {
        self.keys.insert(address, signer);
    }

    pub fn remove(&self, address: &AccountId) -> bool {
        self.keys.remove(address).is_some()
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn resolve_key(&self, address: &AccountId) -> Result<Arc<dyn TxSigner>, KeyError> {
        self.keys
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KeyError::KeyNotFound(address.to_string()))
    }
}
