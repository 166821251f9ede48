// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Event-sourced project/phase/task orchestration, kept independent of the
//! agent core that actually drives a model (see [`worker::AgentRunner`]).
//! The ten control-surface tools in [`tools`] are the seam the agent core
//! exposes to a model: each wraps one [`orchestrator::WorkflowOrchestrator`]
//! method as a `vigil_tools::Tool`.

mod models;
mod orchestrator;
mod store;
mod tools;
mod worker;

pub use models::{
    compute_plan_hash, Budget, BudgetSnapshot, Phase, PhaseEntry, PhaseStatus, Project, ProjectStatus, TaskSpec, TerminalCondition,
    TerminalConditionType, WorkflowError, WorkflowEvent, TERMINAL_STATUSES,
};
pub use orchestrator::{DefaultTerminalConditionEvaluator, TerminalConditionEvaluator, WorkflowOrchestrator};
pub use store::{JsonlProjectStore, ProjectStore};
pub use tools::workflow_tools;
pub use worker::{filter_tools_by_allowlist, AgentRunner, WorkerPool, WorkerResult};
