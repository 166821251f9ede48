// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Rotation across multiple auth profiles for a provider (e.g. several API
//! keys behind the same vendor). No profile is ever removed from the list;
//! cooldowns are the only eviction mechanism.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use vigil_clock::Clock;

#[derive(Debug, Clone)]
pub struct AuthProfile {
    pub name: String,
    pub provider: String,
    pub api_key: String,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl AuthProfile {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { name: name.into(), provider: provider.into(), api_key: api_key.into(), cooldown_until: None }
    }
}

struct State {
    profiles: Vec<AuthProfile>,
    /// Index into `profiles` used as the rotation cursor.
    cursor: usize,
}

/// Manages a provider's pool of auth profiles, rotating away from ones that
/// have recently failed.
pub struct AuthProfileManager {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl AuthProfileManager {
    pub fn new(profiles: Vec<AuthProfile>, clock: Arc<dyn Clock>) -> Self {
        Self { clock, state: Mutex::new(State { profiles, cursor: 0 }) }
    }

    /// The first profile (in list order) whose cooldown has elapsed.
    pub fn get_active(&self) -> Option<AuthProfile> {
        let now = self.clock.now();
        let state = self.state.lock().expect("auth profile mutex poisoned");
        state
            .profiles
            .iter()
            .find(|p| p.cooldown_until.map(|until| until <= now).unwrap_or(true))
            .cloned()
    }

    /// Put `name` on cooldown for `cooldown`.
    pub fn mark_failed(&self, name: &str, cooldown: Duration) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("auth profile mutex poisoned");
        if let Some(p) = state.profiles.iter_mut().find(|p| p.name == name) {
            p.cooldown_until = Some(now + chrono::Duration::from_std(cooldown).unwrap_or_default());
        }
    }

    /// Clear `name`'s cooldown after a successful call.
    pub fn mark_success(&self, name: &str) {
        let mut state = self.state.lock().expect("auth profile mutex poisoned");
        if let Some(p) = state.profiles.iter_mut().find(|p| p.name == name) {
            p.cooldown_until = None;
        }
    }

    /// Cycle the rotation cursor to the next non-cooled-down profile.
    /// Returns `None` if every profile is currently cooled down.
    pub fn rotate(&self) -> Option<AuthProfile> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("auth profile mutex poisoned");
        let len = state.profiles.len();
        if len == 0 {
            return None;
        }
        for step in 1..=len {
            let idx = (state.cursor + step) % len;
            if state.profiles[idx].cooldown_until.map(|until| until <= now).unwrap_or(true) {
                state.cursor = idx;
                return Some(state.profiles[idx].clone());
            }
        }
        None
    }

    pub fn profile_count(&self) -> usize {
        self.state.lock().expect("auth profile mutex poisoned").profiles.len()
    }
}
