use std::time::UNIX_EPOCH;

use prometheus::{
    opts, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    IntCounterVec, IntGaugeVec, Registry,
};

const METRICS_NAMESPACE: &str = "txm";

fn namespaced(name: &str) -> String {
    format!("{}_{}", METRICS_NAMESPACE, name)
}

/// Metrics for a particular chain
#[derive(Clone)]
pub struct TxmMetrics {
    /// Metrics registry for adding new metrics and gathering reports
    registry: Registry,
    /// Liveness of the dispatch loop, expressed as a timestamp since the epoch
    pub loop_liveness: IntGaugeVec,
    /// Unstarted messages seen at the start of the last cycle
    pub unstarted_messages: IntGaugeVec,

    pub enqueued_messages: IntCounterVec,
    pub completed_messages: IntCounterVec,
    pub errored_messages: IntCounterVec,

    pub broadcast_batches: IntCounterVec,
    // with a label for the reason the sender group was left for the next cycle
    pub skipped_batches: IntCounterVec,
}

impl TxmMetrics {
    pub fn new(registry: Registry) -> eyre::Result<Self> {
        let loop_liveness = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("loop_liveness"),
                "The liveness of the dispatch loop, expressed as a timestamp since the epoch",
            ),
            &["chain"],
            registry.clone()
        )?;
        let unstarted_messages = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced("unstarted_messages"),
                "The number of unstarted messages at the start of the last dispatch cycle",
            ),
            &["chain"],
            registry.clone()
        )?;
        let enqueued_messages = register_int_counter_vec_with_registry!(
            opts!(namespaced("enqueued_messages"), "The number of messages enqueued",),
            &["chain"],
            registry.clone()
        )?;
        let completed_messages = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("completed_messages"),
                "The number of messages confirmed on chain",
            ),
            &["chain"],
            registry.clone()
        )?;
        let errored_messages = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("errored_messages"),
                "The number of messages quarantined because their payload could not be decoded",
            ),
            &["chain"],
            registry.clone()
        )?;
        let broadcast_batches = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("broadcast_batches"),
                "The number of sender batches broadcast",
            ),
            &["chain"],
            registry.clone()
        )?;
        let skipped_batches = register_int_counter_vec_with_registry!(
            opts!(
                namespaced("skipped_batches"),
                "The number of sender batches left unstarted for the next cycle",
            ),
            &["chain", "reason"],
            registry.clone()
        )?;
        Ok(Self {
            registry,
            loop_liveness,
            unstarted_messages,
            enqueued_messages,
            completed_messages,
            errored_messages,
            broadcast_batches,
            skipped_batches,
        })
    }

    pub fn update_liveness_metric(&self, chain: &str) {
        self.loop_liveness.with_label_values(&[chain]).set(
            UNIX_EPOCH
                .elapsed()
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        );
    }

    pub fn update_unstarted_messages_metric(&self, count: usize, chain: &str) {
        self.unstarted_messages
            .with_label_values(&[chain])
            .set(count as i64);
    }

    pub fn update_enqueued_messages_metric(&self, chain: &str) {
        self.enqueued_messages.with_label_values(&[chain]).inc();
    }

    pub fn update_completed_messages_metric(&self, count: usize, chain: &str) {
        self.completed_messages
            .with_label_values(&[chain])
            .inc_by(count as u64);
    }

    pub fn update_errored_messages_metric(&self, count: usize, chain: &str) {
        self.errored_messages
            .with_label_values(&[chain])
            .inc_by(count as u64);
    }

    pub fn update_broadcast_batches_metric(&self, chain: &str) {
        self.broadcast_batches.with_label_values(&[chain]).inc();
    }

    pub fn update_skipped_batches_metric(&self, reason: &str, chain: &str) {
        self.skipped_batches
            .with_label_values(&[chain, reason])
            .inc();
    }

    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    #[cfg(test)]
    pub fn dummy_instance() -> Self {
        let registry = Registry::new();
        let instance = Self::new(registry);
        instance.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathered_text_contains_namespaced_metrics() {
        let metrics = TxmMetrics::dummy_instance();
        metrics.update_enqueued_messages_metric("testchain");
        metrics.update_skipped_batches_metric("key_not_found", "testchain");

        let text = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(text.contains("txm_enqueued_messages{chain=\"testchain\"} 1"));
        assert!(text.contains("reason=\"key_not_found\""));
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = Registry::new();
        TxmMetrics::new(registry.clone()).unwrap();
        assert!(TxmMetrics::new(registry).is_err());
    }
}
