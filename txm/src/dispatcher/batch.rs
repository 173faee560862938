use std::collections::HashMap;

use cosmrs::{AccountId, Any};

use crate::decode::{DecodeError, SenderDecoder};
use crate::message::{Message, MessageId};

/// Messages of one sender, in store order, signed together as one transaction
#[derive(Debug, Clone)]
pub struct SenderBatch {
    pub sender: AccountId,
    pub messages: Vec<Message>,
}

impl SenderBatch {
    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn msgs(&self, decoder: &dyn SenderDecoder) -> Vec<Any> {
        self.messages
            .iter()
            .map(|m| decoder.to_any(&m.payload))
            .collect()
    }
}

/// Sender grouping of one cycle. Batches keep the order in which their
/// sender was first seen; nothing survives the cycle.
#[derive(Debug, Default)]
pub struct SenderBatches {
    batches: Vec<SenderBatch>,
    index: HashMap<AccountId, usize>,
    undecodable: Vec<(MessageId, DecodeError)>,
}

impl SenderBatches {
    pub fn group(messages: Vec<Message>, decoder: &dyn SenderDecoder) -> Self {
        let mut grouped = Self::default();
        for message in messages {
            match decoder.decode_sender(&message.payload) {
                Ok(sender) => grouped.push(sender, message),
                Err(err) => grouped.undecodable.push((message.id, err)),
            }
        }
        grouped
    }

    fn push(&mut self, sender: AccountId, message: Message) {
        if let Some(&position) = self.index.get(&sender) {
            if let Some(batch) = self.batches.get_mut(position) {
                batch.messages.push(message);
                return;
            }
        }
        self.index.insert(sender.clone(), self.batches.len());
        self.batches.push(SenderBatch {
            sender,
            messages: vec![message],
        });
    }

    pub fn batches(&self) -> &[SenderBatch] {
        &self.batches
    }

    pub fn undecodable(&self) -> &[(MessageId, DecodeError)] {
        &self.undecodable
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::ExecuteContractDecoder;
    use crate::tests::test_utils::{account, execute_payload};

    use super::*;

    fn message(id: u64, payload: Vec<u8>) -> Message {
        Message::new(MessageId(id), "contract", payload)
    }

    #[test]
    fn groups_by_sender_preserving_read_order() {
        let (x, y) = (account(1), account(2));
        let messages = vec![
            message(1, execute_payload(&x)),
            message(2, execute_payload(&y)),
            message(3, execute_payload(&x)),
            message(4, execute_payload(&y)),
            message(5, execute_payload(&x)),
        ];

        let grouped = SenderBatches::group(messages, &ExecuteContractDecoder);
        assert_eq!(grouped.len(), 2);
        let batches = grouped.batches();
        assert_eq!(batches[0].sender, x);
        assert_eq!(
            batches[0].ids(),
            vec![MessageId(1), MessageId(3), MessageId(5)]
        );
        assert_eq!(batches[1].sender, y);
        assert_eq!(batches[1].ids(), vec![MessageId(2), MessageId(4)]);
        assert!(grouped.undecodable().is_empty());
    }

    #[test]
    fn undecodable_payloads_are_set_aside() {
        let x = account(1);
        let messages = vec![
            message(1, vec![0xff, 0xff, 0xff]),
            message(2, execute_payload(&x)),
        ];

        let grouped = SenderBatches::group(messages, &ExecuteContractDecoder);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped.batches()[0].ids(), vec![MessageId(2)]);
        assert_eq!(grouped.undecodable().len(), 1);
        assert_eq!(grouped.undecodable()[0].0, MessageId(1));
    }

    #[test]
    fn batch_msgs_wrap_raw_payloads() {
        let x = account(1);
        let payload = execute_payload(&x);
        let grouped =
            SenderBatches::group(vec![message(1, payload.clone())], &ExecuteContractDecoder);
        let msgs = grouped.batches()[0].msgs(&ExecuteContractDecoder);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].value, payload);
    }
}
