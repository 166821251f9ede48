// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Ten `Tool` impls that wrap [`WorkflowOrchestrator`] so a model can drive
//! multi-step work itself: create a plan, check on it, steer or approve it,
//! pause/resume/cancel it, re-plan after a failure, advance one task at a
//! time, and sweep completed projects for review.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use vigil_tools::{Tool, ToolCall, ToolOutput, ToolPermission};

use crate::models::{Phase, TerminalCondition};
use crate::orchestrator::WorkflowOrchestrator;

/// The actor label recorded against every event appended by these tools.
/// Distinguishes agent-driven transitions from ones a human made directly
/// through some other surface (e.g. an approval CLI).
const ACTOR: &str = "agent:worker";

fn str_arg<'a>(call: &'a ToolCall, name: &str) -> Result<&'a str, ToolOutput> {
    call.args.get(name).and_then(Value::as_str).ok_or_else(|| ToolOutput::err(&call.id, format!("missing required parameter '{name}'")))
}

fn parse_vec<T: serde::de::DeserializeOwned + Default>(call: &ToolCall, name: &str) -> Result<T, ToolOutput> {
    match call.args.get(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| ToolOutput::err(&call.id, format!("invalid '{name}': {e}"))),
    }
}

fn project_json(project: &crate::models::Project) -> Value {
    serde_json::to_value(project).unwrap_or_else(|_| json!({"id": project.id, "status": project.status}))
}

pub struct CreateProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl CreateProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for CreateProjectTool {
    fn name(&self) -> &str {
        "create_project"
    }

    fn description(&self) -> &str {
        "Start a new multi-step project. Give it a goal and, optionally, an upfront\n\
         plan (phases with tasks and exit criteria) and terminal conditions that\n\
         decide when it's done. A project created with a plan moves straight to\n\
         awaiting_approval; one created goal-only stays in planning until\n\
         reconcile_project sets a plan later."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal": { "type": "string", "description": "What this project is trying to achieve" },
                "phases": { "type": "array", "description": "Ordered list of phases, each with id, name, tasks[], exit_criteria[]", "items": { "type": "object" } },
                "terminal_conditions": { "type": "array", "description": "Conditions checked by review_projects to decide when the project is Done", "items": { "type": "object" } },
                "max_cost_usd": { "type": "number" },
                "max_llm_calls": { "type": "integer" },
                "max_wall_seconds": { "type": "number" }
            },
            "required": ["goal"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let goal = match str_arg(call, "goal") {
            Ok(g) => g,
            Err(e) => return e,
        };
        let phases: Vec<Phase> = match parse_vec(call, "phases") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let terminal_conditions: Vec<TerminalCondition> = match parse_vec(call, "terminal_conditions") {
            Ok(t) => t,
            Err(e) => return e,
        };
        let max_cost_usd = call.args.get("max_cost_usd").and_then(Value::as_f64);
        let max_llm_calls = call.args.get("max_llm_calls").and_then(Value::as_u64);
        let max_wall_seconds = call.args.get("max_wall_seconds").and_then(Value::as_f64);
        let budget = if max_cost_usd.is_some() || max_llm_calls.is_some() || max_wall_seconds.is_some() {
            Some((max_cost_usd, max_llm_calls, max_wall_seconds))
        } else {
            None
        };

        match self.orchestrator.create_project(goal, phases, terminal_conditions, budget, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct CheckProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl CheckProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for CheckProjectTool {
    fn name(&self) -> &str {
        "check_project"
    }

    fn description(&self) -> &str {
        "Read-only snapshot of a project: status, phases, budget usage, and the\n\
         full event history. Never changes anything."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.orchestrator.check_project(id) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct SteerProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl SteerProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for SteerProjectTool {
    fn name(&self) -> &str {
        "steer_project"
    }

    fn description(&self) -> &str {
        "Leave an informational note on a project without changing its status.\n\
         The next advance_project call is expected to take it into account."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" }, "note": { "type": "string" } },
            "required": ["id", "note"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        let note = match str_arg(call, "note") {
            Ok(n) => n,
            Err(e) => return e,
        };
        match self.orchestrator.steer_project(id, note, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ApproveProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ApproveProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ApproveProjectTool {
    fn name(&self) -> &str {
        "approve_project"
    }

    fn description(&self) -> &str {
        "Approve a planned project, moving it from awaiting_approval into\n\
         executing. Subsequent advance_project calls will start running tasks."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.orchestrator.approve_project(id, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct PauseProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl PauseProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for PauseProjectTool {
    fn name(&self) -> &str {
        "pause_project"
    }

    fn description(&self) -> &str {
        "Pause an executing project. advance_project will refuse to run tasks\n\
         against it until resume_project is called."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.orchestrator.pause_project(id, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ResumeProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ResumeProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ResumeProjectTool {
    fn name(&self) -> &str {
        "resume_project"
    }

    fn description(&self) -> &str {
        "Resume a paused project back into executing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.orchestrator.resume_project(id, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

/// Destructive and irreversible (`Cancelled` has no outgoing transitions) —
/// requires an explicit grant before it runs.
pub struct CancelProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl CancelProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for CancelProjectTool {
    fn name(&self) -> &str {
        "cancel_project"
    }

    fn description(&self) -> &str {
        "Cancel a project permanently. Cancelled projects cannot be resumed or\n\
         reconciled — start a new one instead. Requires explicit approval."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" }, "reason": { "type": "string" } },
            "required": ["id", "reason"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        let reason = match str_arg(call, "reason") {
            Ok(r) => r,
            Err(e) => return e,
        };
        match self.orchestrator.cancel_project(id, reason, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ReconcileProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ReconcileProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ReconcileProjectTool {
    fn name(&self) -> &str {
        "reconcile_project"
    }

    fn description(&self) -> &str {
        "Re-plan a failed project: moves it back to planning and replaces its\n\
         phases with a new plan. Use after advance_project reports a failed phase."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "phases": { "type": "array", "items": { "type": "object" } },
                "note": { "type": "string", "description": "Why the plan changed" }
            },
            "required": ["id", "phases", "note"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        let note = match str_arg(call, "note") {
            Ok(n) => n,
            Err(e) => return e,
        };
        let phases: Vec<Phase> = match parse_vec(call, "phases") {
            Ok(p) => p,
            Err(e) => return e,
        };
        match self.orchestrator.reconcile_project(id, phases, note, ACTOR) {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct AdvanceProjectTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl AdvanceProjectTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for AdvanceProjectTool {
    fn name(&self) -> &str {
        "advance_project"
    }

    fn description(&self) -> &str {
        "Run the next pending task of an executing project through a worker and\n\
         record the outcome. Call repeatedly to drive a project to completion —\n\
         each call advances by exactly one task."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Write
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match str_arg(call, "id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.orchestrator.advance_project(id, ACTOR).await {
            Ok(project) => ToolOutput::ok(&call.id, project_json(&project).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ReviewProjectsTool {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl ReviewProjectsTool {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for ReviewProjectsTool {
    fn name(&self) -> &str {
        "review_projects"
    }

    fn description(&self) -> &str {
        "Sweep every project currently in the reviewing state, re-check its\n\
         terminal conditions, and promote the ones fully satisfied to done."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.orchestrator.review_projects(ACTOR) {
            Ok(projects) => {
                let value: Vec<Value> = projects.iter().map(project_json).collect();
                ToolOutput::ok(&call.id, Value::Array(value).to_string())
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

/// All ten control-surface tools, ready to register with a `ToolRegistry`.
pub fn workflow_tools(orchestrator: Arc<WorkflowOrchestrator>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(CreateProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(CheckProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(SteerProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(ApproveProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(PauseProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(ResumeProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(CancelProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(ReconcileProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(AdvanceProjectTool::new(Arc::clone(&orchestrator))),
        Box::new(ReviewProjectsTool::new(orchestrator)),
    ]
}
