//! Per-endpoint latency history
//!
//! Advisory only: nothing here can fail a request.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Placeholder for path segments that identify a single resource
const ID_PLACEHOLDER: &str = ":id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointStats {
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub count: usize,
}

pub struct PerformanceRecorder {
    capacity: usize,
    samples: Mutex<HashMap<String, VecDeque<Duration>>>,
}

impl PerformanceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Append a sample under the normalized key of `path`.
    pub fn record(&self, path: &str, elapsed: Duration) {
        let key = endpoint_key(path);
        let mut guard = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let history = guard.entry(key).or_default();
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(elapsed);
    }

    /// Stats for an endpoint; `path` is normalized the same way as in `record`.
    #[allow(dead_code)]
    pub fn stats(&self, path: &str) -> Option<EndpointStats> {
        let guard = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(&endpoint_key(path)).and_then(summarize)
    }

    /// All endpoints, sorted by key
    pub fn snapshot(&self) -> Vec<(String, EndpointStats)> {
        let guard = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = guard
            .iter()
            .filter_map(|(key, history)| summarize(history).map(|s| (key.clone(), s)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn summarize(history: &VecDeque<Duration>) -> Option<EndpointStats> {
    let min = *history.iter().min()?;
    let max = *history.iter().max()?;
    let total: Duration = history.iter().sum();
    Some(EndpointStats {
        avg: total / history.len() as u32,
        min,
        max,
        count: history.len(),
    })
}

/// Collapse variable path segments so keys stay bounded.
///
/// `/results/42/report?lang=en` and `/results/43/report` share the key
/// `/results/:id/report`.
pub fn endpoint_key(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path
        .split('/')
        .map(|seg| {
            if is_identifier(seg) {
                ID_PLACEHOLDER
            } else {
                seg
            }
        })
        .collect();
    segments.join("/")
}

fn is_identifier(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if uuid::Uuid::parse_str(segment).is_ok() {
        return true;
    }
    // Opaque ids: ObjectIds, hashes, slugs with a numeric tail
    segment.len() >= 16
        && segment.chars().all(|c| c.is_ascii_alphanumeric())
        && segment.chars().any(|c| c.is_ascii_digit())
}
