pub use batch::{SenderBatch, SenderBatches};
pub use engine::{CycleReport, Dispatcher, DispatcherSettings, DispatcherState};
pub use metrics::TxmMetrics;
pub use sender_locks::SenderLocks;

mod batch;
mod engine;
mod metrics;
mod sender_locks;
