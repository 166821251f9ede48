// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Permission tiers (§3) and the layered allow/block policy (§4.4) that
//! decides which tools are visible for a given `(channel, agent)` pair.

use std::collections::HashSet;

use crate::tool::ToolPermission;

/// How much autonomy the running agent has been granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionTier {
    None = 0,
    Observe = 1,
    Interact = 2,
    Full = 3,
}

/// The minimum tier required to see a tool of the given permission class.
pub fn min_tier_for(permission: ToolPermission) -> PermissionTier {
    match permission {
        ToolPermission::Read => PermissionTier::Observe,
        ToolPermission::Write => PermissionTier::Interact,
        ToolPermission::Send | ToolPermission::Admin => PermissionTier::Full,
    }
}

/// A single allow/block layer (global, channel, or agent scope).
#[derive(Debug, Clone, Default)]
pub struct PolicyLayer {
    pub allowlist: Option<HashSet<String>>,
    pub blocklist: HashSet<String>,
}

impl PolicyLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowlist(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.allowlist = Some(names.into_iter().collect());
        self
    }

    pub fn with_blocklist(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.blocklist = names.into_iter().collect();
        self
    }

    /// `names ∩ allowlist` (if present), then `\ blocklist`.
    fn apply(&self, names: HashSet<String>) -> HashSet<String> {
        let names = match &self.allowlist {
            Some(allow) => names.into_iter().filter(|n| allow.contains(n)).collect(),
            None => names,
        };
        names.into_iter().filter(|n| !self.blocklist.contains(n)).collect()
    }
}

/// Compositional global → channel → agent policy (§4.4).
#[derive(Debug, Clone, Default)]
pub struct LayeredToolPolicy {
    pub global: PolicyLayer,
    pub channel: PolicyLayer,
    pub agent: PolicyLayer,
}

impl LayeredToolPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply global, then channel, then agent layers in order. Within each
    /// layer, allowlist is an intersection and blocklist wins.
    pub fn resolve(&self, visible: impl IntoIterator<Item = String>) -> HashSet<String> {
        let names: HashSet<String> = visible.into_iter().collect();
        let names = self.global.apply(names);
        let names = self.channel.apply(names);
        self.agent.apply(names)
    }
}
