use std::collections::HashSet;
use std::io::Write;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use txm_base::db::{DbError, DbResult, TxmRocksDB};
use txm_base::{Decode, Encode, TxmProtocolError};

use super::{Message, MessageId, MessageState};

const MESSAGE_BY_ID_STORAGE_PREFIX: &str = "message_by_id_";
const MESSAGE_ID_BY_STATE_STORAGE_PREFIX: &str = "message_id_by_state_";
const HIGHEST_MESSAGE_ID_STORAGE_PREFIX: &str = "highest_message_id_";

/// Durable queue of outbound messages
#[async_trait]
pub trait MessageDb: Send + Sync {
    /// Persist a new `Unstarted` message under the next free id
    async fn store_new_message(&self, contract: &str, payload: &[u8]) -> DbResult<Message>;

    /// Retrieve a message by its id
    async fn retrieve_message_by_id(&self, id: &MessageId) -> DbResult<Option<Message>>;

    /// Retrieve all messages currently in `state`, ordered by ascending id
    async fn retrieve_messages_by_state(&self, state: MessageState) -> DbResult<Vec<Message>>;

    /// Move the given messages to `state` in one atomic write. Ids that are
    /// unknown or whose current state forbids the transition are skipped.
    /// Returns the ids that were actually moved, in request order.
    async fn store_messages_state(
        &self,
        ids: &[MessageId],
        state: MessageState,
    ) -> DbResult<Vec<MessageId>>;

    /// Retrieve the highest id handed out so far, 0 if none
    async fn retrieve_highest_id(&self) -> DbResult<u64>;
}

fn state_index_prefix(state: MessageState) -> String {
    format!("{}{}_", MESSAGE_ID_BY_STATE_STORAGE_PREFIX, state.as_str())
}

#[async_trait]
impl MessageDb for TxmRocksDB {
    async fn store_new_message(&self, contract: &str, payload: &[u8]) -> DbResult<Message> {
        // the write lock is a blocking guard, so nothing below may await
        let _guard = self.lock_writes();

        let highest_id = highest_message_id(self)?;
        let id = highest_id
            .checked_add(1)
            .map(MessageId)
            .ok_or_else(|| DbError::Other("message id space exhausted".to_owned()))?;
        let message = Message::new(id, contract, payload.to_vec());

        let mut batch = self.batch();
        batch.store_keyed_encodable(MESSAGE_BY_ID_STORAGE_PREFIX, &id, &message);
        batch.store_keyed_encodable(state_index_prefix(message.state), &id, &true);
        // There's no unit struct Encode/Decode impl, so just use `bool` and always use the `Default::default()` key
        batch.store_keyed_encodable(HIGHEST_MESSAGE_ID_STORAGE_PREFIX, &bool::default(), &id.0);
        self.commit(batch)?;

        debug!(?message, "Stored new message");
        Ok(message)
    }

    async fn retrieve_message_by_id(&self, id: &MessageId) -> DbResult<Option<Message>> {
        self.retrieve_keyed_decodable(MESSAGE_BY_ID_STORAGE_PREFIX, id)
    }

    async fn retrieve_messages_by_state(&self, state: MessageState) -> DbResult<Vec<Message>> {
        let ids = self
            .prefix_iterator::<bool>(state_index_prefix(state))
            .map(|entry| -> DbResult<MessageId> {
                let (key, _) = entry?;
                Ok(MessageId::read_from(&mut key.as_slice())?)
            })
            .collect::<DbResult<Vec<_>>>()?;

        ids.into_iter()
            .map(|id| -> DbResult<Message> {
                // the index and the record are written in the same batch
                self.retrieve_keyed_decodable(MESSAGE_BY_ID_STORAGE_PREFIX, &id)?
                    .ok_or_else(|| {
                        DbError::Other(format!("Message {id} is indexed but not stored"))
                    })
            })
            .collect()
    }

    async fn store_messages_state(
        &self,
        ids: &[MessageId],
        state: MessageState,
    ) -> DbResult<Vec<MessageId>> {
        let _guard = self.lock_writes();

        let mut seen = HashSet::new();
        let mut batch = self.batch();
        let mut updated = Vec::new();
        let now = Utc::now();
        for id in ids.iter().filter(|id| seen.insert(**id)) {
            let stored: Option<Message> =
                self.retrieve_keyed_decodable(MESSAGE_BY_ID_STORAGE_PREFIX, id)?;
            let Some(mut message) = stored else {
                warn!(message_id = %id, "Cannot update state of unknown message");
                continue;
            };
            if !message.state.can_transition_to(state) {
                debug!(
                    message_id = %id,
                    current = ?message.state,
                    requested = ?state,
                    "Skipping disallowed message state transition"
                );
                continue;
            }
            batch.delete_keyed(state_index_prefix(message.state), id);
            message.state = state;
            message.updated_at = now;
            batch.store_keyed_encodable(state_index_prefix(state), id, &true);
            batch.store_keyed_encodable(MESSAGE_BY_ID_STORAGE_PREFIX, id, &message);
            updated.push(*id);
        }
        if !batch.is_empty() {
            self.commit(batch)?;
        }
        Ok(updated)
    }

    async fn retrieve_highest_id(&self) -> DbResult<u64> {
        highest_message_id(self)
    }
}

fn highest_message_id(db: &TxmRocksDB) -> DbResult<u64> {
    // return the default value (0) if no message has been stored yet
    db.retrieve_keyed_decodable(HIGHEST_MESSAGE_ID_STORAGE_PREFIX, &bool::default())
        .map(|id: Option<u64>| id.unwrap_or_default())
}

impl Encode for MessageId {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        self.0.write_to(writer)
    }
}

impl Decode for MessageId {
    fn read_from<R>(reader: &mut R) -> Result<Self, TxmProtocolError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        u64::read_from(reader).map(MessageId)
    }
}

impl Encode for Message {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        // Serialize to JSON and write to the writer, to avoid having to implement the encoding manually
        let serialized = serde_json::to_vec(self)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "Failed to serialize"))?;
        writer.write_all(&serialized)?;
        Ok(serialized.len())
    }
}

impl Decode for Message {
    fn read_from<R>(reader: &mut R) -> Result<Self, TxmProtocolError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        serde_json::from_reader(reader)
            .map_err(|err| TxmProtocolError::Deserialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use txm_base::db::{TxmRocksDB, DB};

    use super::*;

    fn tmp_db() -> (tempfile::TempDir, Arc<dyn MessageDb>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = DB::from_path(temp_dir.path()).unwrap();
        let rocksdb = Arc::new(TxmRocksDB::new("testchain", db));
        (temp_dir, rocksdb)
    }

    #[tokio::test]
    async fn test_ids_are_assigned_sequentially() {
        let (_dir, db) = tmp_db();
        for expected in 1..=5u64 {
            let message = db
                .store_new_message("contract", &[expected as u8])
                .await
                .unwrap();
            assert_eq!(message.id, MessageId(expected));
            assert_eq!(message.state, MessageState::Unstarted);
        }
        assert_eq!(db.retrieve_highest_id().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unstarted_selection_is_ordered_by_id() {
        let (_dir, db) = tmp_db();
        // enough ids to cross a byte boundary in the key encoding
        for i in 0..300u32 {
            db
                .store_new_message("contract", &i.to_be_bytes())
                .await
                .unwrap();
        }
        let unstarted = db
            .retrieve_messages_by_state(MessageState::Unstarted)
            .await
            .unwrap();
        let ids = unstarted.iter().map(|m| m.id.0).collect::<Vec<_>>();
        assert_eq!(ids, (1..=300).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_state_transitions_are_one_way() {
        let (_dir, db) = tmp_db();
        let first = db.store_new_message("contract", b"one").await.unwrap();
        let second = db.store_new_message("contract", b"two").await.unwrap();

        let updated = db
            .store_messages_state(&[first.id], MessageState::Completed)
            .await
            .unwrap();
        assert_eq!(updated, vec![first.id]);

        // completed messages never go back, nor sideways
        let updated = db
            .store_messages_state(&[first.id, second.id], MessageState::Errored)
            .await
            .unwrap();
        assert_eq!(updated, vec![second.id]);
        let updated = db
            .store_messages_state(&[first.id], MessageState::Unstarted)
            .await
            .unwrap();
        assert!(updated.is_empty());

        let first = db.retrieve_message_by_id(&first.id).await.unwrap().unwrap();
        let second = db.retrieve_message_by_id(&second.id).await.unwrap().unwrap();
        assert_eq!(first.state, MessageState::Completed);
        assert_eq!(second.state, MessageState::Errored);
        assert_eq!(first.payload, b"one".to_vec());
        assert!(db
            .retrieve_messages_by_state(MessageState::Unstarted)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_ids_are_skipped() {
        let (_dir, db) = tmp_db();
        let message = db.store_new_message("contract", b"payload").await.unwrap();

        let updated = db
            .store_messages_state(
                &[message.id, MessageId(42), message.id],
                MessageState::Completed,
            )
            .await
            .unwrap();
        assert_eq!(updated, vec![message.id]);
        let completed = db
            .retrieve_messages_by_state(MessageState::Completed)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, message.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_get_distinct_ids() {
        let (_dir, db) = tmp_db();
        let handles = (0..8)
            .map(|task| {
                let db = db.clone();
                tokio::spawn(async move {
                    let mut ids = Vec::new();
                    for i in 0..25u8 {
                        let message = db.store_new_message("contract", &[task, i]).await.unwrap();
                        ids.push(message.id);
                    }
                    ids
                })
            })
            .collect::<Vec<_>>();

        let mut ids = Vec::new();
        for handle in handles {
            ids.extend(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(db.retrieve_highest_id().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_messages_survive_reopening() {
        let temp_dir = tempfile::tempdir().unwrap();
        let id = {
            let db = TxmRocksDB::new("testchain", DB::from_path(temp_dir.path()).unwrap());
            db.store_new_message("contract", b"durable").await.unwrap().id
        };
        let db = TxmRocksDB::new("testchain", DB::from_path(temp_dir.path()).unwrap());
        let message = db.retrieve_message_by_id(&id).await.unwrap().unwrap();
        assert_eq!(message.payload, b"durable".to_vec());
        let next = db.store_new_message("contract", b"next").await.unwrap();
        assert_eq!(next.id, MessageId(id.0 + 1));
    }
}
