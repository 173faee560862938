use std::sync::Arc;
use std::time::Duration;

use crate::chain::TxHash;
use crate::dispatcher::TxmMetrics;
use crate::error::TxmError;
use crate::message::MessageState;
use crate::notify::{EventBroadcaster, LocalEventBroadcaster};
use crate::settings::TxmSettings;
use crate::txm::{ServiceState, Txm, TxmDeps};

use super::test_utils::*;

fn settings() -> TxmSettings {
    TxmSettings {
        chain_id: "testchain".to_owned(),
        // long enough that only the initial tick and notifications trigger cycles
        poll_period_ms: 3_600_000,
        confirm_delay_ms: 1,
        ..Default::default()
    }
}

fn txm_with(
    chain: MockChainClient,
    keys: MockKeyProvider,
    broadcaster: Arc<LocalEventBroadcaster>,
) -> (tempfile::TempDir, Txm) {
    let (dir, db) = tmp_db();
    let deps = TxmDeps::new(Arc::new(chain), Arc::new(keys), broadcaster);
    let txm = Txm::new(&settings(), db, deps, TxmMetrics::dummy_instance());
    (dir, txm)
}

fn idle_txm() -> (tempfile::TempDir, Txm) {
    let mut chain = MockChainClient::new();
    chain.expect_gas_price().never();
    txm_with(
        chain,
        keys_for(&[]),
        Arc::new(LocalEventBroadcaster::new()),
    )
}

async fn wait_for_state(txm: &Txm, id: crate::message::MessageId, state: MessageState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if txm.message_state(id).await.unwrap() == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_start_only_once() {
    let (_dir, txm) = idle_txm();
    assert_eq!(txm.service_state(), ServiceState::Created);
    assert!(matches!(txm.healthy(), Err(TxmError::NotStarted)));

    txm.start().await.unwrap();
    assert_eq!(txm.service_state(), ServiceState::Started);
    txm.healthy().unwrap();
    txm.ready().unwrap();
    assert!(matches!(txm.start().await, Err(TxmError::AlreadyStarted)));

    txm.close().await.unwrap();
    assert!(matches!(txm.start().await, Err(TxmError::AlreadyStarted)));
}

#[tokio::test]
async fn test_close_only_once_and_only_after_start() {
    let (_dir, txm) = idle_txm();
    assert!(matches!(txm.close().await, Err(TxmError::NotStarted)));
    assert_eq!(txm.service_state(), ServiceState::Created);

    txm.start().await.unwrap();
    txm.close().await.unwrap();
    assert_eq!(txm.service_state(), ServiceState::Stopped);
    assert!(matches!(txm.healthy(), Err(TxmError::AlreadyStopped)));
    assert!(matches!(txm.ready(), Err(TxmError::AlreadyStopped)));
    assert!(matches!(txm.close().await, Err(TxmError::AlreadyStopped)));
}

#[tokio::test]
async fn test_close_unsubscribes_from_notifications() {
    let broadcaster = Arc::new(LocalEventBroadcaster::new());
    let mut chain = MockChainClient::new();
    chain.expect_gas_price().never();
    let (_dir, txm) = txm_with(chain, keys_for(&[]), broadcaster.clone());

    txm.start().await.unwrap();
    assert_eq!(
        broadcaster.subscriber_count(crate::DEFAULT_NOTIFICATION_CHANNEL),
        1
    );
    txm.close().await.unwrap();
    assert_eq!(
        broadcaster.subscriber_count(crate::DEFAULT_NOTIFICATION_CHANNEL),
        0
    );
}

#[tokio::test]
async fn test_subscription_failure_prevents_start() {
    let broadcaster = Arc::new(LocalEventBroadcaster::new());
    broadcaster.shutdown();
    let mut chain = MockChainClient::new();
    chain.expect_gas_price().never();
    let (_dir, txm) = txm_with(chain, keys_for(&[]), broadcaster);

    let err = txm.start().await.unwrap_err();
    assert!(matches!(err, TxmError::Subscription { .. }));
    assert!(txm.healthy().is_err());
    assert!(matches!(txm.start().await, Err(TxmError::AlreadyStarted)));
}

#[tokio::test]
async fn test_enqueue_notifies_the_running_loop() {
    let x = account(1);
    let mut chain = MockChainClient::new();
    chain.expect_gas_price().times(1).returning(|| Ok(gas_price()));
    chain.expect_account().times(1).returning(|_| {
        Ok(crate::chain::SenderAccount {
            account_number: 1,
            sequence: 0,
        })
    });
    chain
        .expect_sign_and_broadcast()
        .times(1)
        .returning(|_, _, _, _, _| Ok(TxHash("H".to_owned())));
    chain
        .expect_find_transactions()
        .times(1)
        .returning(|_| Ok(vec![tx_record("H")]));
    let broadcaster = Arc::new(LocalEventBroadcaster::new());
    let (_dir, txm) = txm_with(chain, keys_for(&[x.clone()]), broadcaster.clone());

    txm.start().await.unwrap();
    let id = txm.enqueue("contract", &execute_payload(&x)).await.unwrap();
    wait_for_state(&txm, id, MessageState::Completed).await;
    txm.close().await.unwrap();

    // stopped managers still queue, but nothing dispatches any more
    let later = txm.enqueue("contract", &execute_payload(&x)).await.unwrap();
    broadcaster
        .notify(crate::DEFAULT_NOTIFICATION_CHANNEL, "again")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        txm.message_state(later).await.unwrap(),
        Some(MessageState::Unstarted)
    );
}

#[tokio::test]
async fn test_enqueue_assigns_unique_unstarted_ids() {
    let (_dir, txm) = idle_txm();
    let x = account(1);
    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(txm.enqueue("contract", &execute_payload(&x)).await.unwrap());
    }
    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(deduped.len(), 10);
    for id in ids {
        assert_eq!(
            txm.message_state(id).await.unwrap(),
            Some(MessageState::Unstarted)
        );
    }
    assert_eq!(
        txm.select_by_state(MessageState::Unstarted).await.unwrap().len(),
        10
    );
}

#[tokio::test]
async fn test_manual_state_transitions_are_monotonic() {
    let (_dir, txm) = idle_txm();
    let x = account(1);
    let first = txm.enqueue("contract", &execute_payload(&x)).await.unwrap();
    let second = txm.enqueue("contract", &execute_payload(&x)).await.unwrap();

    assert_eq!(txm.mark_errored(&[first]).await.unwrap(), 1);
    assert_eq!(txm.mark_completed(&[first, second]).await.unwrap(), 1);
    assert_eq!(
        txm.message_state(first).await.unwrap(),
        Some(MessageState::Errored)
    );
    let second = txm.retrieve_message(second).await.unwrap().unwrap();
    assert_eq!(second.state, MessageState::Completed);
    assert!(txm
        .message_state(crate::message::MessageId(99))
        .await
        .unwrap()
        .is_none());
}
