// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-key circuit breaker registry.
//!
//! Keys are free-form strings; callers namespace them by convention
//! (`model:<name>`, `provider:<name>`, or a bare service/tool name).
//! Unknown keys are always available — a circuit is only created the first
//! time it is recorded against.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vigil_clock::Clock;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    /// Bounds both the ring buffer of recent outcomes AND the reported
    /// totals (`total_calls`, `successes`, `failures`) in [`CircuitStatus`].
    /// This is a rolling window, not a lifetime counter.
    pub history_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(120),
            history_size: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStatus {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub circuit_open: bool,
}

struct CircuitEntry {
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
    /// `true` = success, `false` = failure, oldest first, bounded to
    /// `history_size` entries.
    history: VecDeque<bool>,
}

impl CircuitEntry {
    fn new() -> Self {
        Self { consecutive_failures: 0, open_until: None, history: VecDeque::new() }
    }
}

/// Registry of independent per-key circuit breakers.
pub struct CircuitRegistry {
    clock: std::sync::Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, CircuitEntry>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { clock, config, entries: Mutex::new(HashMap::new()) }
    }

    /// Record the outcome of a call attributed to `key`.
    pub fn record(&self, key: &str, success: bool, _duration: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("circuit registry mutex poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(CircuitEntry::new);

        entry.history.push_back(success);
        while entry.history.len() > self.config.history_size {
            entry.history.pop_front();
        }

        if success {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= self.config.failure_threshold {
                entry.open_until = Some(now + chrono::Duration::from_std(self.config.open_duration).unwrap());
            }
        }
    }

    /// `false` iff the key's circuit is currently open (`now < open_until`).
    /// Unknown keys are always available.
    pub fn is_available(&self, key: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.lock().expect("circuit registry mutex poisoned");
        match entries.get(key) {
            None => true,
            Some(entry) => match entry.open_until {
                Some(until) => now >= until,
                None => true,
            },
        }
    }

    pub fn get_status(&self, key: &str) -> CircuitStatus {
        let now = self.clock.now();
        let entries = self.entries.lock().expect("circuit registry mutex poisoned");
        match entries.get(key) {
            None => CircuitStatus { total_calls: 0, successes: 0, failures: 0, circuit_open: false },
            Some(entry) => {
                let successes = entry.history.iter().filter(|s| **s).count() as u64;
                let failures = entry.history.iter().filter(|s| !**s).count() as u64;
                let circuit_open = entry.open_until.map(|u| now < u).unwrap_or(false);
                CircuitStatus { total_calls: entry.history.len() as u64, successes, failures, circuit_open }
            }
        }
    }

    /// Manually clear a key's failure state, as if it had never failed.
    pub fn reset(&self, key: &str) {
        let mut entries = self.entries.lock().expect("circuit registry mutex poisoned");
        entries.remove(key);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
