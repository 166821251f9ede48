// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded pool of workers that execute [`TaskSpec`]s against a tool-calling
//! agent loop. `AgentRunner` is the seam that keeps this crate from depending
//! on `vigil-core` (which in turn depends on tool/model/clock crates this
//! crate has no business knowing about) — the real implementation lives
//! there and is injected at runtime.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use vigil_tools::{LayeredToolPolicy, PolicyLayer, ToolRegistry};

use crate::models::{Budget, TaskSpec, WorkflowError};

/// Outcome of running one task on one worker.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub worker_id: String,
    pub task_id: String,
    pub response: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Drives the actual LLM tool-calling loop for a single task. Implemented by
/// `vigil-core::Agent` in the runtime binary; a test double is enough here.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_task(&self, task: &TaskSpec, tools: Arc<ToolRegistry>, policy: LayeredToolPolicy) -> Result<String, anyhow::Error>;
}

/// Keep only the names present in both lists. An empty allowlist means "all
/// tools available" — unknown names in a non-empty allowlist are silently
/// dropped rather than treated as an error (they simply never match).
pub fn filter_tools_by_allowlist(available: &[String], allowlist: &[String]) -> Vec<String> {
    if allowlist.is_empty() {
        return available.to_vec();
    }
    let allowed: HashSet<&str> = allowlist.iter().map(String::as_str).collect();
    available.iter().filter(|name| allowed.contains(name.as_str())).cloned().collect()
}

/// Bounded concurrency around an [`AgentRunner`].
pub struct WorkerPool {
    runner: Arc<dyn AgentRunner>,
    tools: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(runner: Arc<dyn AgentRunner>, tools: Arc<ToolRegistry>, max_concurrent: usize) -> Self {
        Self { runner, tools, semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }

    /// Run a single task. Refuses to even acquire a slot if `budget` is
    /// already exhausted (spec: budget is checked before every spawn).
    pub async fn run_task(&self, task: TaskSpec, budget: Arc<Budget>) -> Result<WorkerResult, WorkflowError> {
        if budget.exhausted() {
            return Err(WorkflowError::BudgetExhausted);
        }
        let _permit = self.semaphore.clone().acquire_owned().await.map_err(|_| WorkflowError::BudgetExhausted)?;

        let allowed = filter_tools_by_allowlist(&self.tools.names(), &task.tool_allowlist);
        let policy = LayeredToolPolicy { agent: PolicyLayer::new().with_allowlist(allowed), ..LayeredToolPolicy::new() };
        let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
        let start = Instant::now();

        let outcome = self.runner.run_task(&task, Arc::clone(&self.tools), policy).await;
        let duration = start.elapsed();
        budget.add_wall_seconds(duration.as_secs_f64());

        match outcome {
            Ok(response) => Ok(WorkerResult { worker_id, task_id: task.id, response, success: true, duration, error: None }),
            Err(e) => Ok(WorkerResult { worker_id, task_id: task.id, response: String::new(), success: false, duration, error: Some(e.to_string()) }),
        }
    }
}
