// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ProjectStatus, to: ProjectStatus },
    #[error("project not found: {0}")]
    NotFound(String),
    #[error("tool '{0}' not in allowlist")]
    ToolPolicyViolation(String),
    #[error("budget exhausted")]
    BudgetExhausted,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    AwaitingApproval,
    Executing,
    Paused,
    Reviewing,
    Done,
    Failed,
    Cancelled,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 8] = [
        ProjectStatus::Planning,
        ProjectStatus::AwaitingApproval,
        ProjectStatus::Executing,
        ProjectStatus::Paused,
        ProjectStatus::Reviewing,
        ProjectStatus::Done,
        ProjectStatus::Failed,
        ProjectStatus::Cancelled,
    ];

    fn allowed_next(self) -> &'static [ProjectStatus] {
        use ProjectStatus::*;
        match self {
            Planning => &[AwaitingApproval, Cancelled, Failed],
            AwaitingApproval => &[Executing, Planning, Cancelled],
            Executing => &[Paused, Reviewing, Failed, Cancelled],
            Paused => &[Executing, Cancelled],
            Reviewing => &[Done, Planning, Executing, Failed],
            Failed => &[Planning, Cancelled],
            Done => &[Planning],
            Cancelled => &[],
        }
    }
}

/// Statuses from which a project can never be advanced again.
pub const TERMINAL_STATUSES: &[ProjectStatus] = &[ProjectStatus::Cancelled];

pub fn validate_transition(from: ProjectStatus, to: ProjectStatus) -> Result<(), WorkflowError> {
    if from.allowed_next().contains(&to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition { from, to })
    }
}

/// Thread-safe call/cost/wall-time accounting for a project.
#[derive(Debug)]
pub struct Budget {
    pub max_cost_usd: Option<f64>,
    pub max_llm_calls: Option<u64>,
    pub max_wall_seconds: Option<f64>,
    state: Mutex<BudgetState>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct BudgetState {
    cost_used_usd: f64,
    llm_calls_used: u64,
    wall_seconds_used: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub max_cost_usd: Option<f64>,
    pub max_llm_calls: Option<u64>,
    pub max_wall_seconds: Option<f64>,
    pub cost_used_usd: f64,
    pub llm_calls_used: u64,
    pub wall_seconds_used: f64,
}

impl Default for Budget {
    fn default() -> Self {
        Self { max_cost_usd: None, max_llm_calls: None, max_wall_seconds: None, state: Mutex::new(BudgetState::default()) }
    }
}

impl Budget {
    pub fn new(max_cost_usd: Option<f64>, max_llm_calls: Option<u64>, max_wall_seconds: Option<f64>) -> Self {
        Self { max_cost_usd, max_llm_calls, max_wall_seconds, state: Mutex::new(BudgetState::default()) }
    }

    fn state(&self) -> BudgetState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_call(&self, cost_usd: f64) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.cost_used_usd += cost_usd;
        s.llm_calls_used += 1;
    }

    pub fn add_wall_seconds(&self, seconds: f64) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.wall_seconds_used += seconds;
    }

    pub fn cost_used_usd(&self) -> f64 {
        self.state().cost_used_usd
    }

    pub fn llm_calls_used(&self) -> u64 {
        self.state().llm_calls_used
    }

    pub fn wall_seconds_used(&self) -> f64 {
        self.state().wall_seconds_used
    }

    pub fn exhausted(&self) -> bool {
        let s = self.state();
        if let Some(max) = self.max_cost_usd {
            if s.cost_used_usd >= max {
                return true;
            }
        }
        if let Some(max) = self.max_llm_calls {
            if s.llm_calls_used >= max {
                return true;
            }
        }
        if let Some(max) = self.max_wall_seconds {
            if s.wall_seconds_used >= max {
                return true;
            }
        }
        false
    }

    /// Minimum fraction of headroom left across all configured bounds.
    /// 1.0 if no bound is configured.
    pub fn remaining_fraction(&self) -> f64 {
        let s = self.state();
        let mut min_fraction = 1.0_f64;
        let mut any = false;
        if let Some(max) = self.max_cost_usd {
            if max > 0.0 {
                any = true;
                min_fraction = min_fraction.min((1.0 - s.cost_used_usd / max).max(0.0));
            }
        }
        if let Some(max) = self.max_llm_calls {
            if max > 0 {
                any = true;
                min_fraction = min_fraction.min((1.0 - (s.llm_calls_used as f64) / (max as f64)).max(0.0));
            }
        }
        if let Some(max) = self.max_wall_seconds {
            if max > 0.0 {
                any = true;
                min_fraction = min_fraction.min((1.0 - s.wall_seconds_used / max).max(0.0));
            }
        }
        if any { min_fraction } else { 1.0 }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let s = self.state();
        BudgetSnapshot {
            max_cost_usd: self.max_cost_usd,
            max_llm_calls: self.max_llm_calls,
            max_wall_seconds: self.max_wall_seconds,
            cost_used_usd: s.cost_used_usd,
            llm_calls_used: s.llm_calls_used,
            wall_seconds_used: s.wall_seconds_used,
        }
    }

    pub fn from_snapshot(s: BudgetSnapshot) -> Self {
        Self {
            max_cost_usd: s.max_cost_usd,
            max_llm_calls: s.max_llm_calls,
            max_wall_seconds: s.max_wall_seconds,
            state: Mutex::new(BudgetState {
                cost_used_usd: s.cost_used_usd,
                llm_calls_used: s.llm_calls_used,
                wall_seconds_used: s.wall_seconds_used,
            }),
        }
    }
}

impl Clone for Budget {
    fn clone(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub tool_allowlist: Vec<String>,
}

fn default_max_attempts() -> u32 {
    1
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id: id.into(), description: description.into(), max_attempts: default_max_attempts(), tool_allowlist: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub description: String,
    #[serde(default)]
    pub met: bool,
}

impl PhaseEntry {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into(), met: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    #[serde(default = "pending_status")]
    pub status: PhaseStatus,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub entry_criteria: Vec<PhaseEntry>,
    #[serde(default)]
    pub exit_criteria: Vec<PhaseEntry>,
}

fn pending_status() -> PhaseStatus {
    PhaseStatus::Pending
}

impl Phase {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), status: PhaseStatus::Pending, tasks: Vec::new(), entry_criteria: Vec::new(), exit_criteria: Vec::new() }
    }

    pub fn exit_criteria_met(&self) -> bool {
        self.exit_criteria.iter().all(|c| c.met)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalConditionType {
    ArtifactExists,
    PhaseCount,
    LlmEval,
    CheckFn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCondition {
    pub description: String,
    #[serde(rename = "type")]
    pub kind: TerminalConditionType,
    #[serde(default)]
    pub met: bool,
}

impl TerminalCondition {
    pub fn new(description: impl Into<String>, kind: TerminalConditionType) -> Self {
        Self { description: description.into(), kind, met: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_id: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub goal: String,
    pub status: ProjectStatus,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub terminal_conditions: Vec<TerminalCondition>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub plan_hash: String,
    #[serde(default)]
    pub events: Vec<WorkflowEvent>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// Budget holds its counters behind a Mutex so it cannot derive Serialize;
// round-trip it through BudgetSnapshot instead.
impl Serialize for Budget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Budget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BudgetSnapshot::deserialize(deserializer).map(Budget::from_snapshot)
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("goal", &self.goal)
            .field("status", &self.status)
            .field("phases", &self.phases.len())
            .finish()
    }
}

impl Project {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            status: ProjectStatus::Planning,
            phases: Vec::new(),
            terminal_conditions: Vec::new(),
            budget: Budget::default(),
            plan_hash: String::new(),
            events: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_terminal_conditions(mut self, conditions: Vec<TerminalCondition>) -> Self {
        self.terminal_conditions = conditions;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn next_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq + 1).unwrap_or(1)
    }
}

/// Canonical hash over goal + (phase id, task id, task description)*.
/// Changing any task's id or description changes the hash; reordering
/// phases or tasks also changes it (order is part of the plan).
pub fn compute_plan_hash(project: &Project) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.goal.as_bytes());
    for phase in &project.phases {
        hasher.update(b"|phase:");
        hasher.update(phase.id.as_bytes());
        for task in &phase.tasks {
            hasher.update(b"|task:");
            hasher.update(task.id.as_bytes());
            hasher.update(b":");
            hasher.update(task.description.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}
