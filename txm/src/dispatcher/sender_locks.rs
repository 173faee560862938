use std::sync::Arc;

use cosmrs::AccountId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-address exclusion for everything between the sequence lookup and the
/// confirmation of a broadcast. Clones share the same registry, so several
/// managers signing for overlapping addresses never race on a sequence.
#[derive(Debug, Clone, Default)]
pub struct SenderLocks {
    locks: Arc<DashMap<AccountId, Arc<Mutex<()>>>>,
}

impl SenderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, sender: &AccountId) -> OwnedMutexGuard<()> {
        // clone the Arc out so the map shard is not held while waiting
        let lock = self
            .locks
            .entry(sender.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn is_locked(&self, sender: &AccountId) -> bool {
        self.locks
            .get(sender)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_sender_is_exclusive() {
        let locks = SenderLocks::new();
        let sender = AccountId::new("wasm", &[1u8; 20]).unwrap();

        let guard = locks.lock(&sender).await;
        assert!(locks.is_locked(&sender));

        let shared = locks.clone();
        let waiter_sender = sender.clone();
        let waiter = tokio::spawn(async move {
            let _guard = shared.lock(&waiter_sender).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_locked(&sender));
    }

    #[tokio::test]
    async fn different_senders_do_not_block_each_other() {
        let locks = SenderLocks::new();
        let first = AccountId::new("wasm", &[1u8; 20]).unwrap();
        let second = AccountId::new("wasm", &[2u8; 20]).unwrap();

        let _first = locks.lock(&first).await;
        let _second = locks.lock(&second).await;
        assert!(locks.is_locked(&first));
        assert!(locks.is_locked(&second));
    }
}
