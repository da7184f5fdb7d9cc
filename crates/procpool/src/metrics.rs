//! Named histograms recorded per allocation attempt
//!
//! [`Metrics`] is a cheap, cloneable handle; every clone records into the same
//! store. Samples are bucketed exactly (one bucket per distinct value), which
//! is what enum and boolean histograms need; times are recorded in
//! milliseconds (or microseconds for the `*Time` take latencies).

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Prefix shared by every histogram
pub const HISTOGRAM_PREFIX: &str = "ProcessPool.";

pub const SPARE_RENDERER_DISPATCH_RESULT: &str = "ProcessPool.SpareRendererDispatchResult";
pub const NO_SPARE_PRESENT_REASON: &str = "ProcessPool.NoSparePresentReason";
pub const SPARE_PROCESS_MAYBE_TAKE_ACTION: &str = "ProcessPool.SpareProcessMaybeTakeAction";
pub const SPARE_PROCESS_MAYBE_TAKE_TIME: &str = "ProcessPool.SpareProcessMaybeTakeTime";
pub const SPARE_PROCESS_MAYBE_TAKE_TIME_TAKEN: &str =
    "ProcessPool.SpareProcessMaybeTakeTime.SpareTaken";
pub const SPARE_PROCESS_STARTUP_TIME: &str = "ProcessPool.SpareProcessStartupTime";
pub const SPARE_PROCESS_DELAY_TIME: &str = "ProcessPool.SpareProcessDelayTime";
pub const PREVIOUSLY_TAKEN_SOURCE: &str = "ProcessPool.SpareRendererPreviouslyTaken.Source";
pub const PREVIOUSLY_TAKEN_STAGE: &str = "ProcessPool.SpareRendererPreviouslyTaken.Stage";
pub const PREVIOUSLY_TAKEN_FOR_COOP: &str = "ProcessPool.SpareRendererPreviouslyTaken.ForCOOP";
pub const TAKEN_IN_SAME_NAVIGATION_STAGES: &str =
    "ProcessPool.SpareRendererTakenInSameNavigation.StageCombination";
pub const TAKEN_IN_SAME_NAVIGATION_FOR_COOP: &str =
    "ProcessPool.SpareRendererTakenInSameNavigation.ForCOOP";

/// `ProcessPool.NoSpareRenderer.<dimension>.<reason>`
pub fn no_spare_renderer_histogram(dimension: &str, reason: &str) -> String {
    format!("{}NoSpareRenderer.{}.{}", HISTOGRAM_PREFIX, dimension, reason)
}

/// Serializable copy of every histogram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Histogram name to sample buckets
    pub histograms: BTreeMap<String, BTreeMap<i64, u64>>,
}

impl MetricsSnapshot {
    pub fn total_count(&self, name: &str) -> u64 {
        self.histograms
            .get(name)
            .map(|buckets| buckets.values().sum())
            .unwrap_or(0)
    }
}

/// Thread-safe histogram recorder
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    store: Arc<Mutex<BTreeMap<String, BTreeMap<i64, u64>>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample of an enumeration
    pub fn record_enum(&self, name: &str, sample: i64) {
        let mut store = self.store.lock();
        *store
            .entry(name.to_string())
            .or_default()
            .entry(sample)
            .or_insert(0) += 1;
    }

    pub fn record_bool(&self, name: &str, sample: bool) {
        self.record_enum(name, i64::from(sample));
    }

    /// Record a duration in milliseconds
    pub fn record_time(&self, name: &str, elapsed: Duration) {
        self.record_enum(name, elapsed.as_millis().min(i64::MAX as u128) as i64);
    }

    /// Record a duration in microseconds
    pub fn record_micros(&self, name: &str, elapsed: Duration) {
        self.record_enum(name, elapsed.as_micros().min(i64::MAX as u128) as i64);
    }

    /// Samples recorded under `name`
    pub fn total_count(&self, name: &str) -> u64 {
        self.store
            .lock()
            .get(name)
            .map(|buckets| buckets.values().sum())
            .unwrap_or(0)
    }

    /// Samples of one value recorded under `name`
    pub fn bucket_count(&self, name: &str, sample: i64) -> u64 {
        self.store
            .lock()
            .get(name)
            .and_then(|buckets| buckets.get(&sample).copied())
            .unwrap_or(0)
    }

    /// Buckets of one histogram
    pub fn samples(&self, name: &str) -> BTreeMap<i64, u64> {
        self.store.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            histograms: self.store.lock().clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    pub fn reset(&self) {
        self.store.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_store() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_enum(SPARE_RENDERER_DISPATCH_RESULT, 2);
        metrics.record_enum(SPARE_RENDERER_DISPATCH_RESULT, 2);
        metrics.record_enum(SPARE_RENDERER_DISPATCH_RESULT, 0);

        assert_eq!(metrics.total_count(SPARE_RENDERER_DISPATCH_RESULT), 3);
        assert_eq!(clone.bucket_count(SPARE_RENDERER_DISPATCH_RESULT, 2), 2);
        assert_eq!(metrics.total_count("ProcessPool.Unknown"), 0);
    }

    #[test]
    fn test_time_and_bool_samples() {
        let metrics = Metrics::new();
        metrics.record_time(SPARE_PROCESS_STARTUP_TIME, Duration::from_millis(250));
        metrics.record_bool(PREVIOUSLY_TAKEN_FOR_COOP, true);
        assert_eq!(metrics.bucket_count(SPARE_PROCESS_STARTUP_TIME, 250), 1);
        assert_eq!(metrics.bucket_count(PREVIOUSLY_TAKEN_FOR_COOP, 1), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.record_enum(NO_SPARE_PRESENT_REASON, 1);
        let json = metrics.to_json().unwrap();
        let snapshot: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.total_count(NO_SPARE_PRESENT_REASON), 1);

        metrics.reset();
        assert_eq!(metrics.total_count(NO_SPARE_PRESENT_REASON), 0);
    }

    #[test]
    fn test_no_spare_renderer_name() {
        assert_eq!(
            no_spare_renderer_histogram("AllocationSource", "ProcessLimit"),
            "ProcessPool.NoSpareRenderer.AllocationSource.ProcessLimit"
        );
    }
}
