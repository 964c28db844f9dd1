use serde::Serialize;
use std::sync::Mutex;

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

/// Counters collected over the lifetime of a beamformer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: usize,
    pub errors: usize,
    pub cpu_fallbacks: usize,
    pub window_generations: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_processed(&self) {
        self.update(|metrics| metrics.processed += 1);
    }

    pub fn record_error(&self) {
        self.update(|metrics| metrics.errors += 1);
    }

    pub fn record_fallback(&self) {
        self.update(|metrics| metrics.cpu_fallbacks += 1);
    }

    pub fn record_window_generation(&self) {
        self.update(|metrics| metrics.window_generations += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
