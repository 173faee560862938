use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{TypedDB, DB};

/// DB handle for storing data tied to a specific chain.
///
/// Reads may run concurrently with anything. Every read-modify-write sequence
/// must hold [`TxmRocksDB::lock_writes`] for its whole duration so that
/// concurrent producers never interleave.
#[derive(Debug, Clone)]
pub struct TxmRocksDB {
    chain_id: String,
    db: TypedDB,
    write_lock: Arc<Mutex<()>>,
}

impl std::ops::Deref for TxmRocksDB {
    type Target = TypedDB;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl AsRef<DB> for TxmRocksDB {
    fn as_ref(&self) -> &DB {
        self.db.as_ref()
    }
}

impl TxmRocksDB {
    /// Instantiate a new `TxmRocksDB` scoped to `chain_id`
    pub fn new(chain_id: &str, db: DB) -> Self {
        Self {
            chain_id: chain_id.to_owned(),
            db: TypedDB::new(chain_id.to_owned(), db),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the chain this database is scoped to
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Serialize writers. The guard must not be held across an `.await`.
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }
}
