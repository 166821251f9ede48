// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Operations that drive a [`Project`] through its lifecycle. Each public
//! method appends exactly the events needed to realize one state change and
//! returns the resulting snapshot; nothing here mutates a `Project` in place.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::models::{Budget, PhaseStatus, Project, ProjectStatus, TaskSpec, TerminalCondition, TerminalConditionType, WorkflowError};
use crate::store::ProjectStore;
use crate::worker::WorkerPool;

/// Evaluates one of the four declarative terminal-condition kinds against a
/// project snapshot. `LlmEval` conditions can't be judged here — they need a
/// model call, which this crate has no way to make — so they are left unmet
/// until something external (an agent loop, by calling `mark_condition_met`)
/// resolves them.
pub trait TerminalConditionEvaluator: Send + Sync {
    fn evaluate(&self, project: &Project, condition: &TerminalCondition) -> bool;
}

/// Default evaluator: `ArtifactExists` checks the filesystem (the
/// condition's description is treated as a path), `PhaseCount` checks every
/// phase is `Done`, `CheckFn` consults a registry of named closures, and
/// `LlmEval` always reports unmet.
#[derive(Default, Clone)]
pub struct DefaultTerminalConditionEvaluator {
    check_fns: HashMap<String, Arc<dyn Fn(&Project) -> bool + Send + Sync>>,
}

impl DefaultTerminalConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_check_fn(&mut self, name: impl Into<String>, f: impl Fn(&Project) -> bool + Send + Sync + 'static) {
        self.check_fns.insert(name.into(), Arc::new(f));
    }
}

impl TerminalConditionEvaluator for DefaultTerminalConditionEvaluator {
    fn evaluate(&self, project: &Project, condition: &TerminalCondition) -> bool {
        match condition.kind {
            TerminalConditionType::ArtifactExists => Path::new(&condition.description).exists(),
            TerminalConditionType::PhaseCount => !project.phases.is_empty() && project.phases.iter().all(|p| p.status == PhaseStatus::Done),
            TerminalConditionType::CheckFn => self.check_fns.get(&condition.description).map(|f| f(project)).unwrap_or(false),
            TerminalConditionType::LlmEval => false,
        }
    }
}

fn transition(store: &dyn ProjectStore, id: &str, project: &Project, to: ProjectStatus, actor: &str) -> Result<Project, WorkflowError> {
    crate::models::validate_transition(project.status, to)?;
    store.append(id, "transitioned", actor, serde_json::json!({ "to": to }))
}

/// Drives projects through their lifecycle. Cheap to construct; holds no
/// state of its own beyond the shared store, worker pool, and evaluator.
pub struct WorkflowOrchestrator {
    store: Arc<dyn ProjectStore>,
    pool: Arc<WorkerPool>,
    evaluator: Arc<dyn TerminalConditionEvaluator>,
}

impl WorkflowOrchestrator {
    pub fn new(store: Arc<dyn ProjectStore>, pool: Arc<WorkerPool>, evaluator: Arc<dyn TerminalConditionEvaluator>) -> Self {
        Self { store, pool, evaluator }
    }

    /// Create a project and, if a plan is given up front, move straight to
    /// `AwaitingApproval` so `approve_project` can start execution.
    pub fn create_project(
        &self,
        goal: &str,
        phases: Vec<crate::models::Phase>,
        terminal_conditions: Vec<TerminalCondition>,
        budget: Option<(Option<f64>, Option<u64>, Option<f64>)>,
        actor: &str,
    ) -> Result<Project, WorkflowError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut project = self.store.create(&id, goal, actor)?;
        if !phases.is_empty() || !terminal_conditions.is_empty() {
            project = self.store.append(
                &id,
                "plan_set",
                actor,
                serde_json::json!({ "phases": phases, "terminal_conditions": terminal_conditions }),
            )?;
        }
        if let Some((max_cost_usd, max_llm_calls, max_wall_seconds)) = budget {
            project = self.store.append(
                &id,
                "budget_set",
                actor,
                serde_json::json!({ "max_cost_usd": max_cost_usd, "max_llm_calls": max_llm_calls, "max_wall_seconds": max_wall_seconds }),
            )?;
        }
        if !project.phases.is_empty() {
            project = transition(self.store.as_ref(), &id, &project, ProjectStatus::AwaitingApproval, actor)?;
        }
        Ok(project)
    }

    /// Read-only snapshot. Never appends an event.
    pub fn check_project(&self, id: &str) -> Result<Project, WorkflowError> {
        self.store.load(id)?.ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    /// Record an informational steering note without changing status —
    /// the next `advance_project` call is expected to take it into account.
    pub fn steer_project(&self, id: &str, note: &str, actor: &str) -> Result<Project, WorkflowError> {
        self.store.append(id, "steered", actor, serde_json::json!({ "note": note }))
    }

    pub fn approve_project(&self, id: &str, actor: &str) -> Result<Project, WorkflowError> {
        let project = self.check_project(id)?;
        transition(self.store.as_ref(), id, &project, ProjectStatus::Executing, actor)
    }

    pub fn pause_project(&self, id: &str, actor: &str) -> Result<Project, WorkflowError> {
        let project = self.check_project(id)?;
        transition(self.store.as_ref(), id, &project, ProjectStatus::Paused, actor)
    }

    pub fn resume_project(&self, id: &str, actor: &str) -> Result<Project, WorkflowError> {
        let project = self.check_project(id)?;
        transition(self.store.as_ref(), id, &project, ProjectStatus::Executing, actor)
    }

    /// Destructive; the caller (the agent core's approval gate) is expected
    /// to have already obtained a grant before invoking this.
    pub fn cancel_project(&self, id: &str, reason: &str, actor: &str) -> Result<Project, WorkflowError> {
        let project = self.check_project(id)?;
        let project = self.store.append(id, "tags_set", actor, serde_json::json!({ "tags": append_tag(&project.tags, "cancelled") }))?;
        let project = self.store.append(id, "steered", actor, serde_json::json!({ "note": format!("cancel reason: {reason}") }))?;
        transition(self.store.as_ref(), id, &project, ProjectStatus::Cancelled, actor)
    }

    /// Re-plan after a failure: `Failed -> Planning`, replacing the plan.
    pub fn reconcile_project(
        &self,
        id: &str,
        phases: Vec<crate::models::Phase>,
        note: &str,
        actor: &str,
    ) -> Result<Project, WorkflowError> {
        let project = self.check_project(id)?;
        let project = transition(self.store.as_ref(), id, &project, ProjectStatus::Planning, actor)?;
        let project = self.store.append(id, "steered", actor, serde_json::json!({ "note": note }))?;
        self.store.append(id, "plan_set", actor, serde_json::json!({ "phases": phases, "terminal_conditions": project.terminal_conditions }))
    }

    /// Run the next pending task of the next non-done phase through the
    /// worker pool, recording budget usage and phase progress. Moves to
    /// `Reviewing` once every phase is `Done`.
    pub async fn advance_project(&self, id: &str, actor: &str) -> Result<Project, WorkflowError> {
        let project = self.check_project(id)?;
        if project.status != ProjectStatus::Executing {
            return Err(WorkflowError::InvalidTransition { from: project.status, to: ProjectStatus::Executing });
        }
        let budget = Arc::new(project.budget.clone());
        if budget.exhausted() {
            return Err(WorkflowError::BudgetExhausted);
        }

        let Some(phase_idx) = project.phases.iter().position(|p| p.status != PhaseStatus::Done) else {
            return transition(self.store.as_ref(), id, &project, ProjectStatus::Reviewing, actor);
        };
        let phase = &project.phases[phase_idx];
        let Some(task) = phase.tasks.first().cloned() else {
            let updated = self.store.append(
                id,
                "phase_updated",
                actor,
                serde_json::json!({ "phase_id": phase.id, "status": PhaseStatus::Done, "exit_criteria": phase.exit_criteria }),
            )?;
            return Ok(updated);
        };

        let result = self.pool.run_task(task, Arc::clone(&budget)).await?;
        let project = self.store.append(
            id,
            "budget_usage",
            actor,
            serde_json::json!({ "wall_seconds": result.duration.as_secs_f64() }),
        )?;

        let mut exit_criteria = phase.exit_criteria.clone();
        for c in exit_criteria.iter_mut() {
            c.met = c.met || result.success;
        }
        let new_status = if result.success && exit_criteria.iter().all(|c| c.met) { PhaseStatus::Done } else if result.success { PhaseStatus::Active } else { PhaseStatus::Failed };
        let project = self.store.append(
            id,
            "phase_updated",
            actor,
            serde_json::json!({ "phase_id": phase.id, "status": new_status, "exit_criteria": exit_criteria }),
        )?;

        if new_status == PhaseStatus::Failed {
            return transition(self.store.as_ref(), id, &project, ProjectStatus::Failed, actor);
        }
        Ok(project)
    }

    /// Evaluate terminal conditions for every project currently `Reviewing`,
    /// marking met conditions and promoting fully-satisfied ones to `Done`.
    pub fn review_projects(&self, actor: &str) -> Result<Vec<Project>, WorkflowError> {
        let mut reviewed = Vec::new();
        for project in self.store.list()? {
            if project.status != ProjectStatus::Reviewing {
                continue;
            }
            let mut current = project;
            for condition in current.terminal_conditions.clone() {
                if condition.met {
                    continue;
                }
                if self.evaluator.evaluate(&current, &condition) {
                    current = self.store.append(
                        &current.id,
                        "terminal_condition_updated",
                        actor,
                        serde_json::json!({ "description": condition.description, "met": true }),
                    )?;
                }
            }
            if !current.terminal_conditions.is_empty() && current.terminal_conditions.iter().all(|c| c.met) {
                current = transition(self.store.as_ref(), &current.id, &current, ProjectStatus::Done, actor)?;
            }
            reviewed.push(current);
        }
        Ok(reviewed)
    }
}

fn append_tag(tags: &[String], tag: &str) -> Vec<String> {
    let mut out = tags.to_vec();
    if !out.iter().any(|t| t == tag) {
        out.push(tag.to_string());
    }
    out
}
