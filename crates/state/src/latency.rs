//! Per-origin latency samples.

use std::collections::{HashMap, VecDeque};

/// Rolling latency samples per origin endpoint.
///
/// Each endpoint keeps at most `window` samples; the oldest sample is
/// discarded when a new one arrives. Endpoints without samples report the
/// configured penalty so they rank last without being excluded.
#[derive(Debug)]
pub struct LatencyStats {
    window: usize,
    penalty_ms: u64,
    samples: HashMap<String, VecDeque<u64>>,
}

impl LatencyStats {
    pub fn new(window: usize, penalty_ms: u64) -> Self {
        Self {
            window: window.max(1),
            penalty_ms,
            samples: HashMap::new(),
        }
    }

    pub fn record(&mut self, endpoint: &str, latency_ms: u64) {
        let window = self.window;
        let samples = self
            .samples
            .entry(endpoint.to_string())
            .or_insert_with(|| VecDeque::with_capacity(window));
        if samples.len() == window {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    pub fn mean(&self, endpoint: &str) -> u64 {
        match self.samples.get(endpoint) {
            Some(samples) if !samples.is_empty() => {
                samples.iter().sum::<u64>() / samples.len() as u64
            }
            _ => self.penalty_ms,
        }
    }
}
