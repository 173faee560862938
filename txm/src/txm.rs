use std::sync::Arc;

use eyre::Context;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use txm_base::db::{TxmRocksDB, DB};

use crate::chain::ChainClient;
use crate::decode::{ExecuteContractDecoder, SenderDecoder};
use crate::dispatcher::{Dispatcher, DispatcherState, SenderLocks, TxmMetrics};
use crate::error::TxmError;
use crate::keys::KeyProvider;
use crate::message::{Message, MessageDb, MessageId, MessageState};
use crate::notify::EventBroadcaster;
use crate::settings::TxmSettings;

/// Lifecycle of a [`Txm`]. Each transition happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Started,
    Stopped,
}

enum Lifecycle {
    Created,
    Started {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Collaborators the manager is wired to
#[derive(Clone)]
pub struct TxmDeps {
    pub chain: Arc<dyn ChainClient>,
    pub keys: Arc<dyn KeyProvider>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub decoder: Arc<dyn SenderDecoder>,
    /// Share one registry between managers that may sign for the same addresses
    pub sender_locks: SenderLocks,
}

impl TxmDeps {
    /// Dependencies for `MsgExecuteContract` payloads and a private lock registry
    pub fn new(
        chain: Arc<dyn ChainClient>,
        keys: Arc<dyn KeyProvider>,
        broadcaster: Arc<dyn EventBroadcaster>,
    ) -> Self {
        Self {
            chain,
            keys,
            broadcaster,
            decoder: Arc::new(ExecuteContractDecoder),
            sender_locks: SenderLocks::new(),
        }
    }
}

/// Durable transaction manager: a message queue plus the loop draining it
/// onto the chain.
pub struct Txm {
    db: Arc<dyn MessageDb>,
    broadcaster: Arc<dyn EventBroadcaster>,
    dispatcher: Dispatcher,
    metrics: TxmMetrics,
    channel: String,
    lifecycle: Mutex<Lifecycle>,
    state: RwLock<ServiceState>,
}

impl Txm {
    pub fn new(
        settings: &TxmSettings,
        db: Arc<dyn MessageDb>,
        deps: TxmDeps,
        metrics: TxmMetrics,
    ) -> Self {
        let state = DispatcherState::new(
            db.clone(),
            deps.chain,
            deps.keys,
            deps.decoder,
            deps.sender_locks,
            metrics.clone(),
        );
        Self {
            db,
            broadcaster: deps.broadcaster,
            dispatcher: Dispatcher::new(state, settings.dispatcher_settings()),
            metrics,
            channel: settings.notification_channel.clone(),
            lifecycle: Mutex::new(Lifecycle::Created),
            state: RwLock::new(ServiceState::Created),
        }
    }

    /// Open the rocksdb store named in `settings` and build a manager on it
    pub fn try_from_settings(
        settings: &TxmSettings,
        deps: TxmDeps,
        metrics: TxmMetrics,
    ) -> eyre::Result<Self> {
        settings.validate()?;
        let db = DB::from_path(&settings.db)
            .with_context(|| format!("Failed to open message store at {:?}", settings.db))?;
        let rocksdb = Arc::new(TxmRocksDB::new(&settings.chain_id, db));
        Ok(Self::new(settings, rocksdb, deps, metrics))
    }

    /// Subscribe to the notification channel and spawn the dispatch loop
    pub async fn start(&self) -> Result<(), TxmError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(TxmError::AlreadyStarted);
        }

        let subscription = match self.broadcaster.subscribe(&self.channel).await {
            Ok(subscription) => subscription,
            Err(source) => {
                error!(channel = %self.channel, ?source, "Failed to subscribe, not starting");
                *lifecycle = Lifecycle::Stopped;
                *self.state.write() = ServiceState::Stopped;
                return Err(TxmError::Subscription {
                    channel: self.channel.clone(),
                    source,
                });
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let span = info_span!("Txm", chain = %self.dispatcher.settings().chain_id);
        let handle = tokio::spawn(
            async move { dispatcher.run(subscription, shutdown_rx).await }.instrument(span),
        );

        *lifecycle = Lifecycle::Started { shutdown, handle };
        *self.state.write() = ServiceState::Started;
        info!(channel = %self.channel, "Transaction manager started");
        Ok(())
    }

    /// Stop the dispatch loop and wait for it to exit. A cycle that is
    /// already running finishes first.
    pub async fn close(&self) -> Result<(), TxmError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Created => {
                *lifecycle = Lifecycle::Created;
                Err(TxmError::NotStarted)
            }
            Lifecycle::Stopped => Err(TxmError::AlreadyStopped),
            Lifecycle::Started { shutdown, handle } => {
                *self.state.write() = ServiceState::Stopped;
                if shutdown.send(true).is_err() {
                    warn!("Dispatch loop exited before it was asked to stop");
                }
                if let Err(err) = handle.await {
                    error!(?err, "Dispatch loop task failed");
                }
                info!("Transaction manager stopped");
                Ok(())
            }
        }
    }

    pub fn service_state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Lifecycle status only, never message delivery progress
    pub fn healthy(&self) -> Result<(), TxmError> {
        match self.service_state() {
            ServiceState::Started => Ok(()),
            ServiceState::Created => Err(TxmError::NotStarted),
            ServiceState::Stopped => Err(TxmError::AlreadyStopped),
        }
    }

    pub fn ready(&self) -> Result<(), TxmError> {
        self.healthy()
    }

    /// Durably queue a message, then wake the dispatch loop
    pub async fn enqueue(&self, contract: &str, payload: &[u8]) -> Result<MessageId, TxmError> {
        let message = self
            .db
            .store_new_message(contract, payload)
            .await
            .map_err(|err| {
                error!(?err, contract, "Failed to enqueue message");
                TxmError::from(err)
            })?;
        self.metrics
            .update_enqueued_messages_metric(&self.dispatcher.settings().chain_id);
        info!(message_id = %message.id, contract, "Enqueued message");

        if let Err(err) = self
            .broadcaster
            .notify(&self.channel, &message.id.to_string())
            .await
        {
            // the poll timer still picks the message up
            warn!(?err, message_id = %message.id, "Failed to notify dispatch loop");
        }
        Ok(message.id)
    }

    pub async fn message_state(&self, id: MessageId) -> Result<Option<MessageState>, TxmError> {
        Ok(self
            .db
            .retrieve_message_by_id(&id)
            .await?
            .map(|message| message.state))
    }

    pub async fn retrieve_message(&self, id: MessageId) -> Result<Option<Message>, TxmError> {
        Ok(self.db.retrieve_message_by_id(&id).await?)
    }

    pub async fn select_by_state(&self, state: MessageState) -> Result<Vec<Message>, TxmError> {
        Ok(self.db.retrieve_messages_by_state(state).await?)
    }

    pub async fn mark_completed(&self, ids: &[MessageId]) -> Result<usize, TxmError> {
        let updated = self
            .db
            .store_messages_state(ids, MessageState::Completed)
            .await?;
        Ok(updated.len())
    }

    pub async fn mark_errored(&self, ids: &[MessageId]) -> Result<usize, TxmError> {
        let updated = self
            .db
            .store_messages_state(ids, MessageState::Errored)
            .await?;
        Ok(updated.len())
    }

    /// Dispatcher driving this manager, e.g. to run a cycle by hand
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &TxmMetrics {
        &self.metrics
    }
}
