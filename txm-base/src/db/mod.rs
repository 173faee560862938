use std::path::PathBuf;
use std::{io, path::Path, sync::Arc};

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB as Rocks};
use tracing::info;

use crate::TxmProtocolError;

pub use iterator::PrefixIterator;
pub use txm_db::*;
pub use typed_db::*;

/// Iteration over prefixed keys
mod iterator;
/// DB operations scoped to a single chain
mod txm_db;
/// Type-specific db operations
mod typed_db;

#[derive(Debug, Clone)]
/// A KV Store
pub struct DB(Arc<Rocks>);

impl From<Rocks> for DB {
    fn from(rocks: Rocks) -> Self {
        Self(Arc::new(rocks))
    }
}

/// DB Error type
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// Rocks DB Error
    #[error("{0}")]
    RockError(#[from] rocksdb::Error),
    #[error("Failed to open {path}, canonicalized as {canonicalized}: {source}")]
    /// Error opening the database
    OpeningError {
        /// Rocksdb error during opening
        #[source]
        source: rocksdb::Error,
        /// Raw database path provided
        path: PathBuf,
        /// Parsed path used
        canonicalized: PathBuf,
    },
    /// Could not parse the provided database path string
    #[error("Invalid database path supplied {1:?}; {0}")]
    InvalidDbPath(#[source] io::Error, String),
    /// Stored value could not be decoded
    #[error("{0}")]
    ProtocolError(#[from] TxmProtocolError),
    /// Custom error
    #[error("{0}")]
    Other(String),
}

/// Rocks DB result type
pub type DbResult<T> = std::result::Result<T, DbError>;

impl DB {
    /// Opens db at `db_path` and creates if missing
    #[tracing::instrument(err)]
    pub fn from_path(db_path: &Path) -> DbResult<DB> {
        let path = {
            let mut path = db_path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .canonicalize()
                .map_err(|e| DbError::InvalidDbPath(e, db_path.to_string_lossy().into()))?;
            if let Some(file_name) = db_path.file_name() {
                path.push(file_name);
            }
            path
        };

        if path.is_dir() {
            info!(path=%path.to_string_lossy(), "Opening existing db")
        } else {
            info!(path=%path.to_string_lossy(), "Creating db")
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);

        Rocks::open(&opts, &path)
            .map_err(|e| DbError::OpeningError {
                source: e,
                path: db_path.into(),
                canonicalized: path,
            })
            .map(Into::into)
    }

    /// Store a value in the DB
    pub fn store(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        Ok(self.0.put(key, value)?)
    }

    /// Retrieve a value from the DB
    pub fn retrieve(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.0.get(key)?)
    }

    /// Apply every operation of `batch` atomically
    pub fn write(&self, batch: WriteBatch) -> DbResult<()> {
        Ok(self.0.write(batch)?)
    }

    /// Iterate over all keys greater or equal to `prefix`, in key order.
    /// Callers are responsible for stopping once keys no longer match.
    pub fn iterate_from(&self, prefix: &[u8]) -> rocksdb::DBIterator<'_> {
        self.0
            .iterator(IteratorMode::From(prefix, Direction::Forward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_reopens_the_same_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("txm-db");
        {
            let db = DB::from_path(&path).unwrap();
            db.store(b"key", b"value").unwrap();
        }
        let db = DB::from_path(&path).unwrap();
        assert_eq!(db.retrieve(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(db.retrieve(b"missing").unwrap(), None);
    }

    #[test]
    fn rejects_a_path_with_missing_parent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("does-not-exist").join("db");
        let err = DB::from_path(&path).unwrap_err();
        assert!(matches!(err, DbError::InvalidDbPath(..)));
    }
}
