// Telemetry sink — per-backend call counters and per-batch crawl counters.
//
// Recording is fire-and-forget: the trait methods return nothing, and an
// implementation that fails internally must swallow the failure.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

pub trait Telemetry: Send + Sync {
    /// One call to an acquisition backend. `api` names the backend and
    /// operation (e.g. "mirror.timeline"), `result` the outcome class
    /// ("ok" or a `FetchError::class`).
    fn backend_call(&self, api: &str, result: &str);

    /// One account crawled in a batch: how many new items, and which
    /// strategy produced them.
    fn crawl_result(&self, items_found: usize, source: &str);
}

/// Emits telemetry as `tracing` debug events. Default sink for the CLI.
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn backend_call(&self, api: &str, result: &str) {
        debug!(api, result, "backend call");
    }

    fn crawl_result(&self, items_found: usize, source: &str) {
        debug!(items_found, source, "crawl result");
    }
}

/// Keeps counters in memory. Used by tests and by `skybridge delta` to
/// print which backends were hit.
#[derive(Default)]
pub struct CountingTelemetry {
    calls: Mutex<HashMap<(String, String), u64>>,
    items: Mutex<HashMap<String, u64>>,
}

impl CountingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls recorded for `api` with the given result class.
    pub fn calls(&self, api: &str, result: &str) -> u64 {
        self.calls
            .lock()
            .map(|c| {
                c.get(&(api.to_string(), result.to_string()))
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Total items found through `source`.
    pub fn items_from(&self, source: &str) -> u64 {
        self.items
            .lock()
            .map(|i| i.get(source).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// All call counters, sorted for display.
    pub fn snapshot(&self) -> Vec<(String, String, u64)> {
        let mut rows: Vec<_> = self
            .calls
            .lock()
            .map(|c| {
                c.iter()
                    .map(|((api, result), n)| (api.clone(), result.clone(), *n))
                    .collect()
            })
            .unwrap_or_default();
        rows.sort();
        rows
    }
}

impl Telemetry for CountingTelemetry {
    fn backend_call(&self, api: &str, result: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls
                .entry((api.to_string(), result.to_string()))
                .or_insert(0) += 1;
        }
    }

    fn crawl_result(&self, items_found: usize, source: &str) {
        if let Ok(mut items) = self.items.lock() {
            *items.entry(source.to_string()).or_insert(0) += items_found as u64;
        }
    }
}
