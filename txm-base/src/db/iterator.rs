use std::marker::PhantomData;

use rocksdb::DBIterator;

use crate::db::{DbError, DbResult};
use crate::Decode;

/// An iterator over a prefix that yields the key suffix and deserialized value.
/// Iteration ends at the first key outside the prefix.
pub struct PrefixIterator<'a, V> {
    iter: DBIterator<'a>,
    prefix: Vec<u8>,
    exhausted: bool,
    _phantom: PhantomData<*const V>,
}

impl<'a, V> PrefixIterator<'a, V> {
    /// Wrap a rocksdb iterator positioned at `prefix`
    pub fn new(iter: DBIterator<'a>, prefix: Vec<u8>) -> Self {
        Self {
            iter,
            prefix,
            exhausted: false,
            _phantom: PhantomData,
        }
    }
}

impl<V> Iterator for PrefixIterator<'_, V>
where
    V: Decode,
{
    type Item = DbResult<(Vec<u8>, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let entry = match self.iter.next()? {
            Ok(entry) => entry,
            Err(err) => {
                self.exhausted = true;
                return Some(Err(DbError::from(err)));
            }
        };
        let (key, value) = entry;
        let Some(suffix) = key.strip_prefix(self.prefix.as_slice()) else {
            self.exhausted = true;
            return None;
        };
        let decoded = V::read_from(&mut &value[..])
            .map(|v| (suffix.to_vec(), v))
            .map_err(DbError::from);
        Some(decoded)
    }
}
