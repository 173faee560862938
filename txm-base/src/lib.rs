//! Shared infrastructure for the transaction manager: rocksdb storage with
//! typed, prefixed keys, canonical encodings and settings/tracing setup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use encode::{Decode, Encode, TxmProtocolError};

/// Rocksdb-backed storage
pub mod db;
/// Settings loading and tracing configuration
pub mod settings;

mod encode;
