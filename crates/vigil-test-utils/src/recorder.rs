//! In-memory metrics recorder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

type CounterKey = (String, Vec<(String, String)>);

/// Recorder that keeps counter values for assertions.
///
/// Install it for a scope with [`metrics::with_local_recorder`]. Gauges and
/// histograms are discarded.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = CapturingRecorder::default();
/// metrics::with_local_recorder(&recorder, || trail.enqueue(event));
/// assert_eq!(recorder.counter(EVENTS_ENQUEUED, &[("type", "access_denied")]), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CapturingRecorder {
    counters: Arc<Mutex<BTreeMap<CounterKey, Arc<AtomicU64>>>>,
    described: Arc<Mutex<BTreeSet<String>>>,
}

impl CapturingRecorder {
    /// Returns the value of the counter with exactly these labels, or 0.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), sorted_labels(labels.iter().copied()));
        self.counters
            .lock()
            .expect("lock")
            .get(&key)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// Returns the sum of a counter over all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("lock")
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, c)| c.load(Ordering::SeqCst))
            .sum()
    }

    /// Returns true if a description was registered for `name`.
    pub fn is_described(&self, name: &str) -> bool {
        self.described.lock().expect("lock").contains(name)
    }

    fn describe(&self, key: &KeyName) {
        self.described
            .lock()
            .expect("lock")
            .insert(key.as_str().to_string());
    }
}

fn sorted_labels<'a>(labels: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<(String, String)> {
    let mut labels: Vec<_> = labels
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    labels
}

impl Recorder for CapturingRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.describe(&key);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.describe(&key);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.describe(&key);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let labels = sorted_labels(key.labels().map(|l| (l.key(), l.value())));
        let value = Arc::clone(
            self.counters
                .lock()
                .expect("lock")
                .entry((key.name().to_string(), labels))
                .or_default(),
        );
        Counter::from_arc(value)
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
