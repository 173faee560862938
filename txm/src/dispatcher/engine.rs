use std::sync::Arc;
use std::time::Duration;

use cosmrs::AccountId;
use derive_new::new;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::chain::{BroadcastMode, ChainClient, GasPrice, TxFilter, TxHash};
use crate::decode::SenderDecoder;
use crate::error::TxmError;
use crate::keys::KeyProvider;
use crate::message::{MessageDb, MessageId, MessageState};
use crate::notify::Subscription;

use super::batch::{SenderBatch, SenderBatches};
use super::metrics::TxmMetrics;
use super::sender_locks::SenderLocks;

// `tokio::time::interval` panics on a zero period
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Timing knobs of the dispatch loop
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Label used in logs and metrics
    pub chain_id: String,
    /// Cycle cadence when no notification arrives
    pub poll_period: Duration,
    /// Pause between a broadcast and each confirmation lookup
    pub confirm_delay: Duration,
    /// Confirmation lookups per broadcast, at least one
    pub confirm_attempts: u32,
}

/// Everything a dispatch cycle talks to
#[derive(Clone, new)]
pub struct DispatcherState {
    pub(crate) db: Arc<dyn MessageDb>,
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) keys: Arc<dyn KeyProvider>,
    pub(crate) decoder: Arc<dyn SenderDecoder>,
    pub(crate) sender_locks: SenderLocks,
    pub(crate) metrics: TxmMetrics,
}

/// What a single dispatch cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unstarted messages read at the start of the cycle
    pub loaded: usize,
    /// Sender batches that were broadcast
    pub broadcast: usize,
    pub completed: Vec<MessageId>,
    /// Messages quarantined because their payload did not decode
    pub errored: Vec<MessageId>,
    /// Sender groups left unstarted, with the reason
    pub skipped: Vec<(AccountId, &'static str)>,
}

impl CycleReport {
    pub fn is_noop(&self) -> bool {
        self.loaded == 0
    }
}

enum Trigger {
    Tick,
    Notification,
    NotificationsClosed,
    Shutdown,
}

#[derive(Clone)]
pub struct Dispatcher {
    state: DispatcherState,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(state: DispatcherState, settings: DispatcherSettings) -> Self {
        Self { state, settings }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Run cycles on every timer tick and notification until `shutdown`
    /// flips to true or its sender is dropped. A running cycle is never
    /// interrupted; notifications that arrive during a cycle trigger exactly
    /// one more.
    pub async fn run(&self, subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        let mut subscription = Some(subscription);
        let mut ticker = interval(self.settings.poll_period.max(MIN_POLL_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            chain = %self.settings.chain_id,
            poll_period = ?self.settings.poll_period,
            "Starting dispatch loop"
        );

        loop {
            self.state
                .metrics
                .update_liveness_metric(&self.settings.chain_id);
            if *shutdown.borrow() {
                break;
            }
            let trigger = tokio::select! {
                biased;
                changed = shutdown.changed() => match changed {
                    Ok(()) if !*shutdown.borrow() => continue,
                    _ => Trigger::Shutdown,
                },
                _ = ticker.tick() => Trigger::Tick,
                event = next_notification(&mut subscription) => match event {
                    Some(_) => Trigger::Notification,
                    None => Trigger::NotificationsClosed,
                },
            };
            match trigger {
                Trigger::Shutdown => break,
                Trigger::NotificationsClosed => {
                    warn!(
                        chain = %self.settings.chain_id,
                        "Notification channel closed, falling back to polling"
                    );
                    subscription = None;
                    continue;
                }
                Trigger::Tick => debug!("Dispatch triggered by timer"),
                Trigger::Notification => debug!("Dispatch triggered by notification"),
            }

            // the cycle reads the store after this point, so it covers every
            // insert announced so far; later notifications wake the next cycle
            if let Some(subscription) = subscription.as_mut() {
                let coalesced = subscription.drain();
                if coalesced > 0 {
                    debug!(coalesced, "Coalesced pending notifications into this cycle");
                }
            }

            self.send_msg_batch().await;
        }
        info!(chain = %self.settings.chain_id, "Dispatch loop stopped");
    }

    /// Run one dispatch cycle over every unstarted message
    #[instrument(skip(self), fields(chain = %self.settings.chain_id))]
    pub async fn send_msg_batch(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let chain = self.settings.chain_id.as_str();

        let unstarted = match self
            .state
            .db
            .retrieve_messages_by_state(MessageState::Unstarted)
            .await
        {
            Ok(unstarted) => unstarted,
            Err(err) => {
                error!(?err, "Failed to load unstarted messages");
                return report;
            }
        };
        report.loaded = unstarted.len();
        self.state
            .metrics
            .update_unstarted_messages_metric(unstarted.len(), chain);
        if unstarted.is_empty() {
            return report;
        }

        let grouped = SenderBatches::group(unstarted, self.state.decoder.as_ref());
        report.errored = self.quarantine(&grouped).await;
        if grouped.is_empty() {
            return report;
        }

        let gas_price = match self.state.chain.gas_price().await {
            Ok(gas_price) => gas_price,
            Err(err) => {
                warn!(?err, "Failed to get gas price, ending cycle");
                for batch in grouped.batches() {
                    self.record_skip(&mut report, batch, "gas_price");
                }
                return report;
            }
        };
        debug!(?gas_price, batches = grouped.len(), "Dispatching sender batches");

        for batch in grouped.batches() {
            match self.process_batch(batch, &gas_price, &mut report).await {
                Ok(completed) => {
                    info!(
                        sender = %batch.sender,
                        ids = ?completed,
                        "Sender batch confirmed and completed"
                    );
                    self.state
                        .metrics
                        .update_completed_messages_metric(completed.len(), chain);
                    report.completed.extend(completed);
                }
                Err(err) => {
                    match &err {
                        TxmError::StoreUnavailable(_) => error!(
                            ?err,
                            sender = %batch.sender,
                            ids = ?batch.ids(),
                            "Batch was confirmed on chain but could not be marked completed, it will be sent again"
                        ),
                        TxmError::ConfirmationAmbiguous { .. } => warn!(
                            ?err,
                            sender = %batch.sender,
                            ids = ?batch.ids(),
                            "Could not confirm batch, leaving it for the next cycle"
                        ),
                        _ => warn!(
                            ?err,
                            sender = %batch.sender,
                            ids = ?batch.ids(),
                            "Skipping sender batch"
                        ),
                    }
                    self.record_skip(&mut report, batch, err.to_metrics_label());
                }
            }
        }
        report
    }

    /// Move undecodable messages out of the unstarted set
    async fn quarantine(&self, grouped: &SenderBatches) -> Vec<MessageId> {
        let undecodable = grouped.undecodable();
        if undecodable.is_empty() {
            return vec![];
        }
        for (id, source) in undecodable {
            let err = TxmError::Decode {
                id: *id,
                source: source.clone(),
            };
            error!(
                message_id = %id,
                error = %err,
                "Quarantining message with undecodable payload"
            );
        }
        let ids = undecodable.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        match self
            .state
            .db
            .store_messages_state(&ids, MessageState::Errored)
            .await
        {
            Ok(updated) => {
                self.state
                    .metrics
                    .update_errored_messages_metric(updated.len(), &self.settings.chain_id);
                updated
            }
            Err(err) => {
                error!(?err, ?ids, "Failed to quarantine messages");
                vec![]
            }
        }
    }

    #[instrument(
        skip(self, batch, gas_price, report),
        fields(sender = %batch.sender, batch_size = batch.messages.len())
    )]
    async fn process_batch(
        &self,
        batch: &SenderBatch,
        gas_price: &GasPrice,
        report: &mut CycleReport,
    ) -> Result<Vec<MessageId>, TxmError> {
        let _sender_guard = self.state.sender_locks.lock(&batch.sender).await;

        let signer = self.state.keys.resolve_key(&batch.sender).await?;
        let account = self.state.chain.account(&batch.sender).await?;
        debug!(?account, "Fetched sender account");

        let hash = self
            .state
            .chain
            .sign_and_broadcast(
                batch.msgs(self.state.decoder.as_ref()),
                account,
                gas_price.clone(),
                signer,
                BroadcastMode::Block,
            )
            .await?;
        report.broadcast = report.broadcast.saturating_add(1);
        self.state
            .metrics
            .update_broadcast_batches_metric(&self.settings.chain_id);
        info!(tx_hash = %hash, sequence = account.sequence, "Broadcast sender batch");

        self.confirm(&hash).await?;

        let ids = batch.ids();
        let updated = self
            .state
            .db
            .store_messages_state(&ids, MessageState::Completed)
            .await?;
        if updated.len() != ids.len() {
            debug!(
                ?updated,
                expected = ?ids,
                "Some messages were already terminal"
            );
        }
        Ok(updated)
    }

    /// Look `hash` up until exactly one transaction matches or the attempts
    /// run out. More than one match is ambiguous straight away.
    async fn confirm(&self, hash: &TxHash) -> Result<(), TxmError> {
        let filter = TxFilter::hash(hash);
        let attempts = self.settings.confirm_attempts.max(1);
        let mut last_err = TxmError::ConfirmationAmbiguous {
            hash: hash.clone(),
            matches: 0,
        };
        for attempt in 1..=attempts {
            sleep(self.settings.confirm_delay).await;
            match self.state.chain.find_transactions(&filter).await {
                Ok(txs) if txs.len() == 1 => {
                    debug!(tx_hash = %hash, attempt, "Transaction confirmed");
                    return Ok(());
                }
                Ok(txs) if txs.is_empty() => {
                    debug!(tx_hash = %hash, attempt, attempts, "Transaction not indexed yet");
                    last_err = TxmError::ConfirmationAmbiguous {
                        hash: hash.clone(),
                        matches: 0,
                    };
                }
                Ok(txs) => {
                    return Err(TxmError::ConfirmationAmbiguous {
                        hash: hash.clone(),
                        matches: txs.len(),
                    })
                }
                Err(err) => {
                    debug!(?err, tx_hash = %hash, attempt, attempts, "Transaction lookup failed");
                    last_err = err.into();
                }
            }
        }
        Err(last_err)
    }

    fn record_skip(&self, report: &mut CycleReport, batch: &SenderBatch, reason: &'static str) {
        self.state
            .metrics
            .update_skipped_batches_metric(reason, &self.settings.chain_id);
        report.skipped.push((batch.sender.clone(), reason));
    }
}

async fn next_notification(subscription: &mut Option<Subscription>) -> Option<String> {
    match subscription.as_mut() {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
