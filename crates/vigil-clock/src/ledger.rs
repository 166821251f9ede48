// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("failed to read budget ledger")]
    Read(#[source] std::io::Error),
    #[error("failed to write budget ledger")]
    Write(#[source] std::io::Error),
    #[error("budget ledger document is corrupt")]
    Corrupt(#[source] serde_json::Error),
}

/// On-disk document for `token_usage.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerDocument {
    date: NaiveDate,
    input_tokens: u64,
    output_tokens: u64,
    calls: u64,
}

impl LedgerDocument {
    fn fresh(date: NaiveDate) -> Self {
        Self { date, input_tokens: 0, output_tokens: 0, calls: 0 }
    }
}

/// A point-in-time view of the ledger, returned by [`BudgetLedger::summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub daily_limit: u64,
    /// When the file/process lock cannot be acquired, fail open (treat the
    /// call as within-budget) instead of the default fail-closed behavior.
    pub fail_open_on_error: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            daily_limit: 1_000_000,
            fail_open_on_error: false,
        }
    }
}

/// Daily token-usage accounting, persisted as a single JSON document.
///
/// All mutating operations acquire an in-process mutex for no longer than
/// one read-modify-write cycle. If the mutex is already held (another
/// thread is mid-write) the call does not block: it fails immediately
/// according to `fail_open_on_error`, matching the "fails closed unless
/// configured to fail open" contract.
pub struct BudgetLedger {
    clock: Arc<dyn Clock>,
    config: Mutex<LedgerConfig>,
    doc: Mutex<LedgerDocument>,
}

impl BudgetLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().date_naive();
        let doc = load_or_default(&config.data_dir, today).unwrap_or_else(|err| {
            warn!(error = %err, "budget ledger unreadable, starting fresh");
            LedgerDocument::fresh(today)
        });
        Self { clock, config: Mutex::new(config), doc: Mutex::new(doc) }
    }

    pub fn configure(&self, data_dir: Option<PathBuf>, daily_limit: Option<u64>, fail_open: Option<bool>) {
        let mut cfg = self.config.lock().expect("ledger config mutex poisoned");
        if let Some(dir) = data_dir {
            cfg.data_dir = dir;
        }
        if let Some(limit) = daily_limit {
            cfg.daily_limit = limit;
        }
        if let Some(fail_open) = fail_open {
            cfg.fail_open_on_error = fail_open;
        }
    }

    fn path(&self) -> PathBuf {
        self.config.lock().expect("ledger config mutex poisoned").data_dir.join("token_usage.json")
    }

    /// Roll the in-memory document over to today if the local date changed
    /// since it was last touched, then return a locked guard.
    fn roll_and_lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerDocument>, TryLockError<std::sync::MutexGuard<'_, LedgerDocument>>> {
        let mut guard = self.doc.try_lock()?;
        let today = self.clock.now().date_naive();
        if guard.date != today {
            *guard = LedgerDocument::fresh(today);
        }
        Ok(guard)
    }

    /// Record token usage for one completed LLM call.
    pub fn record_usage(&self, input: u64, output: u64) -> Result<(), BudgetError> {
        let mut guard = match self.roll_and_lock() {
            Ok(g) => g,
            Err(_) => {
                warn!("budget ledger contended on record_usage; skipping write this call");
                return Ok(());
            }
        };
        guard.input_tokens += input;
        guard.output_tokens += output;
        guard.calls += 1;
        let snapshot = guard.clone();
        drop(guard);
        write_atomic(&self.path(), &snapshot)
    }

    /// `(within_budget, remaining)`. `remaining` may be negative once usage
    /// exceeds the configured daily limit.
    pub fn check_budget(&self, limit_override: Option<u64>) -> (bool, i64) {
        let fail_open = self.config.lock().expect("ledger config mutex poisoned").fail_open_on_error;
        let limit = limit_override.unwrap_or_else(|| self.config.lock().expect("ledger config mutex poisoned").daily_limit);
        let guard = match self.roll_and_lock() {
            Ok(g) => g,
            Err(_) => {
                return if fail_open { (true, limit as i64) } else { (false, 0) };
            }
        };
        let used = guard.input_tokens + guard.output_tokens;
        let remaining = limit as i64 - used as i64;
        (remaining >= 0, remaining)
    }

    /// Fraction of the daily limit consumed so far, clamped to `[0, 1]` for
    /// display purposes (callers that need the raw over-budget ratio should
    /// use [`BudgetLedger::check_budget`] instead).
    pub fn pressure(&self) -> f32 {
        let limit = self.config.lock().expect("ledger config mutex poisoned").daily_limit;
        if limit == 0 {
            return 1.0;
        }
        let guard = match self.roll_and_lock() {
            Ok(g) => g,
            Err(_) => return 1.0,
        };
        let used = (guard.input_tokens + guard.output_tokens) as f32;
        (used / limit as f32).clamp(0.0, 1.0)
    }

    pub fn summary(&self) -> BudgetSnapshot {
        let guard = self.doc.lock().expect("ledger doc mutex poisoned");
        BudgetSnapshot {
            input_tokens: guard.input_tokens,
            output_tokens: guard.output_tokens,
            calls: guard.calls,
            total_tokens: guard.input_tokens + guard.output_tokens,
        }
    }
}

fn load_or_default(data_dir: &Path, today: NaiveDate) -> Result<LedgerDocument, BudgetError> {
    let path = data_dir.join("token_usage.json");
    if !path.is_file() {
        return Ok(LedgerDocument::fresh(today));
    }
    let text = std::fs::read_to_string(&path).map_err(BudgetError::Read)?;
    let doc: LedgerDocument = serde_json::from_str(&text).map_err(BudgetError::Corrupt)?;
    if doc.date != today {
        return Ok(LedgerDocument::fresh(today));
    }
    Ok(doc)
}

fn write_atomic(path: &Path, doc: &LedgerDocument) -> Result<(), BudgetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(BudgetError::Write)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(doc).map_err(BudgetError::Corrupt)?;
    std::fs::write(&tmp, text).map_err(BudgetError::Write)?;
    std::fs::rename(&tmp, path).map_err(BudgetError::Write)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
