use derive_new::new;
use rocksdb::WriteBatch;

use crate::db::{DbResult, PrefixIterator, DB};
use crate::{Decode, Encode};

/// DB handle for storing data tied to a specific type/entity.
///
/// Key structure: ```<entity>_<prefix>_<key>```
#[derive(Debug, Clone, new)]
pub struct TypedDB {
    entity: String,
    db: DB,
}

impl AsRef<DB> for TypedDB {
    fn as_ref(&self) -> &DB {
        &self.db
    }
}

impl TypedDB {
    fn full_prefix(&self, prefix: impl AsRef<[u8]>) -> Vec<u8> {
        full_prefix(&self.entity, prefix)
    }

    fn full_key(&self, prefix: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Vec<u8> {
        let mut buf = self.full_prefix(prefix);
        buf.extend(key.as_ref());
        buf
    }

    /// Store encodable kv pair
    pub fn store_keyed_encodable<K: Encode, V: Encode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: &K,
        value: &V,
    ) -> DbResult<()> {
        self.db
            .store(&self.full_key(prefix, key.to_vec()), &value.to_vec())
    }

    /// Retrieve decodable value given encodable key
    pub fn retrieve_keyed_decodable<K: Encode, V: Decode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: &K,
    ) -> DbResult<Option<V>> {
        Ok(self
            .db
            .retrieve(&self.full_key(prefix, key.to_vec()))?
            .map(|val| V::read_from(&mut val.as_slice()))
            .transpose()?)
    }

    /// Iterate over every value stored under `prefix`, ordered by encoded key
    pub fn prefix_iterator<V: Decode>(&self, prefix: impl AsRef<[u8]>) -> PrefixIterator<'_, V> {
        let full_prefix = self.full_prefix(prefix);
        PrefixIterator::new(self.db.iterate_from(&full_prefix), full_prefix)
    }

    /// Start an atomic batch of writes scoped to this entity
    pub fn batch(&self) -> TypedBatch {
        TypedBatch {
            entity: self.entity.clone(),
            inner: WriteBatch::default(),
        }
    }

    /// Commit a batch created by [`TypedDB::batch`]
    pub fn commit(&self, batch: TypedBatch) -> DbResult<()> {
        self.db.write(batch.inner)
    }
}

/// A set of writes that are applied together or not at all
pub struct TypedBatch {
    entity: String,
    inner: WriteBatch,
}

impl TypedBatch {
    /// Queue an encodable kv pair
    pub fn store_keyed_encodable<K: Encode, V: Encode>(
        &mut self,
        prefix: impl AsRef<[u8]>,
        key: &K,
        value: &V,
    ) {
        let mut full_key = full_prefix(&self.entity, prefix);
        full_key.extend(key.to_vec());
        self.inner.put(full_key, value.to_vec());
    }

    /// Queue the removal of a key
    pub fn delete_keyed<K: Encode>(&mut self, prefix: impl AsRef<[u8]>, key: &K) {
        let mut full_key = full_prefix(&self.entity, prefix);
        full_key.extend(key.to_vec());
        self.inner.delete(full_key);
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no operation was queued
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

fn full_prefix(entity: &str, prefix: impl AsRef<[u8]>) -> Vec<u8> {
    let mut full_prefix = vec![];
    full_prefix.extend(entity.as_bytes());
    full_prefix.extend("_".as_bytes());
    full_prefix.extend(prefix.as_ref());
    full_prefix
}
