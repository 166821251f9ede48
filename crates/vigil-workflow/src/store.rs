// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Event-sourced JSONL persistence for projects.
//!
//! Layout under the store's base directory:
//!
//! ```text
//! base_dir/
//!     _projects.jsonl   index: one JSON line per project header (id, goal, status)
//!     {project_id}.jsonl  append-only log of WorkflowEvent, one per line
//! ```
//!
//! A [`Project`] is never the unit of storage — it is a cached snapshot
//! rebuilt deterministically by folding [`apply_event`] over the log. The
//! index exists only so [`ProjectStore::list`] doesn't have to replay every
//! project's full history.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::models::{compute_plan_hash, Phase, Project, ProjectStatus, TerminalCondition, WorkflowError, WorkflowEvent};

const INDEX_FILE: &str = "_projects.jsonl";

/// Storage backend for projects. Every mutation is expressed as an
/// appended [`WorkflowEvent`]; callers never write `Project` fields directly.
pub trait ProjectStore: Send + Sync {
    fn create(&self, id: &str, goal: &str, actor: &str) -> Result<Project, WorkflowError>;
    fn append(&self, id: &str, kind: &str, actor: &str, payload: Value) -> Result<Project, WorkflowError>;
    fn load(&self, id: &str) -> Result<Option<Project>, WorkflowError>;
    fn list(&self) -> Result<Vec<Project>, WorkflowError>;
}

/// Apply a single event onto a project snapshot. Pure and deterministic:
/// replaying the same event log always yields the same `Project`.
pub fn apply_event(project: &mut Project, event: &WorkflowEvent) {
    match event.kind.as_str() {
        "created" => {
            if let Some(goal) = event.payload.get("goal").and_then(Value::as_str) {
                project.goal = goal.to_string();
            }
        }
        "transitioned" => {
            if let Some(to) = event.payload.get("to").and_then(|v| serde_json::from_value::<ProjectStatus>(v.clone()).ok()) {
                project.status = to;
            }
        }
        "plan_set" => {
            if let Some(phases) = event.payload.get("phases").and_then(|v| serde_json::from_value::<Vec<Phase>>(v.clone()).ok()) {
                project.phases = phases;
            }
            if let Some(conditions) =
                event.payload.get("terminal_conditions").and_then(|v| serde_json::from_value::<Vec<TerminalCondition>>(v.clone()).ok())
            {
                project.terminal_conditions = conditions;
            }
            project.plan_hash = compute_plan_hash(project);
        }
        "budget_set" => {
            let max_cost_usd = event.payload.get("max_cost_usd").and_then(Value::as_f64);
            let max_llm_calls = event.payload.get("max_llm_calls").and_then(Value::as_u64);
            let max_wall_seconds = event.payload.get("max_wall_seconds").and_then(Value::as_f64);
            project.budget = crate::models::Budget::new(max_cost_usd, max_llm_calls, max_wall_seconds);
        }
        "budget_usage" => {
            if let Some(cost) = event.payload.get("cost_usd").and_then(Value::as_f64) {
                project.budget.record_call(cost);
            }
            if let Some(secs) = event.payload.get("wall_seconds").and_then(Value::as_f64) {
                project.budget.add_wall_seconds(secs);
            }
        }
        "phase_updated" => {
            let Some(phase_id) = event.payload.get("phase_id").and_then(Value::as_str) else { return };
            let Some(phase) = project.phases.iter_mut().find(|p| p.id == phase_id) else { return };
            if let Some(status) = event.payload.get("status").and_then(|v| serde_json::from_value(v.clone()).ok()) {
                phase.status = status;
            }
            if let Some(exit_criteria) = event.payload.get("exit_criteria").and_then(|v| serde_json::from_value(v.clone()).ok()) {
                phase.exit_criteria = exit_criteria;
            }
        }
        "terminal_condition_updated" => {
            let Some(description) = event.payload.get("description").and_then(Value::as_str) else { return };
            if let Some(cond) = project.terminal_conditions.iter_mut().find(|c| c.description == description) {
                if let Some(met) = event.payload.get("met").and_then(Value::as_bool) {
                    cond.met = met;
                }
            }
        }
        "tags_set" => {
            if let Some(tags) = event.payload.get("tags").and_then(|v| serde_json::from_value(v.clone()).ok()) {
                project.tags = tags;
            }
        }
        // "steered" and other purely-informational kinds leave no field
        // mutation; they are preserved by being appended to `project.events`.
        _ => {}
    }
    project.events.push(event.clone());
}

/// Append-only JSONL event store, mirroring `vigil_session::JsonlSessionStore`'s
/// per-path locking discipline.
pub struct JsonlProjectStore {
    base: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonlProjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, WorkflowError> {
        let base = base_dir.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base, locks: Mutex::new(HashMap::new()) })
    }

    fn index_path(&self) -> PathBuf {
        self.base.join(INDEX_FILE)
    }

    fn project_path(&self, id: &str) -> PathBuf {
        self.base.join(format!("{id}.jsonl"))
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = path.to_string_lossy().into_owned();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn with_locks<F, R>(&self, paths: &[PathBuf], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut unique: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        unique.sort();
        unique.dedup();
        let arcs: Vec<Arc<Mutex<()>>> = unique.iter().map(|p| self.path_lock(Path::new(p))).collect();
        let _guards: Vec<_> = arcs.iter().map(|a| a.lock().unwrap_or_else(|e| e.into_inner())).collect();
        f()
    }

    fn append_unlocked(path: &Path, value: &impl serde::Serialize) -> Result<(), WorkflowError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(value).map_err(std::io::Error::from)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_events_unlocked(path: &Path) -> Result<Vec<WorkflowEvent>, WorkflowError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkflowEvent>(trimmed) {
                Ok(e) => out.push(e),
                Err(e) => tracing::warn!(line = n + 1, path = %path.display(), error = %e, "skipping corrupted workflow event"),
            }
        }
        Ok(out)
    }

    fn rebuild(id: &str, events: &[WorkflowEvent]) -> Project {
        let mut project = Project::new(id, "");
        project.events.clear();
        for event in events {
            apply_event(&mut project, event);
        }
        project
    }

    fn index_entry(project: &Project) -> Value {
        serde_json::json!({
            "id": project.id,
            "goal": project.goal,
            "status": project.status,
        })
    }

    fn append_index(&self, project: &Project) -> Result<(), WorkflowError> {
        Self::append_unlocked(&self.index_path(), &Self::index_entry(project))
    }
}

impl ProjectStore for JsonlProjectStore {
    fn create(&self, id: &str, goal: &str, actor: &str) -> Result<Project, WorkflowError> {
        let path = self.project_path(id);
        let index_path = self.index_path();
        self.with_locks(&[path.clone(), index_path.clone()], || {
            let event = WorkflowEvent {
                event_id: event_id(),
                seq: 1,
                kind: "created".to_string(),
                timestamp: Utc::now(),
                actor: actor.to_string(),
                payload: serde_json::json!({ "goal": goal }),
            };
            Self::append_unlocked(&path, &event)?;
            let project = Self::rebuild(id, &[event]);
            self.append_index(&project)?;
            Ok(project)
        })
    }

    fn append(&self, id: &str, kind: &str, actor: &str, payload: Value) -> Result<Project, WorkflowError> {
        let path = self.project_path(id);
        if !path.exists() {
            return Err(WorkflowError::NotFound(id.to_string()));
        }
        self.with_locks(&[path.clone()], || {
            let existing = Self::read_events_unlocked(&path)?;
            let seq = existing.last().map(|e| e.seq + 1).unwrap_or(1);
            let event = WorkflowEvent { event_id: event_id(), seq, kind: kind.to_string(), timestamp: Utc::now(), actor: actor.to_string(), payload };
            Self::append_unlocked(&path, &event)?;
            let mut all = existing;
            all.push(event);
            Ok(Self::rebuild(id, &all))
        })
    }

    fn load(&self, id: &str) -> Result<Option<Project>, WorkflowError> {
        let path = self.project_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let events = self.with_locks(&[path.clone()], || Self::read_events_unlocked(&path))?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::rebuild(id, &events)))
    }

    fn list(&self) -> Result<Vec<Project>, WorkflowError> {
        let index_path = self.index_path();
        if !index_path.exists() {
            return Ok(Vec::new());
        }
        let entries = self.with_locks(&[index_path.clone()], || {
            let file = File::open(&index_path)?;
            let reader = BufReader::new(file);
            let mut ids = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
                    if let Some(id) = v.get("id").and_then(Value::as_str) {
                        ids.push(id.to_string());
                    }
                }
            }
            Ok::<_, WorkflowError>(ids)
        })?;
        let mut seen = std::collections::HashSet::new();
        let mut projects = Vec::new();
        for id in entries {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(project) = self.load(&id)? {
                projects.push(project);
            }
        }
        Ok(projects)
    }
}

fn event_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("evt-{}-{n}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PhaseEntry, TaskSpec, TerminalConditionType};

    fn store(dir: &tempfile::TempDir) -> JsonlProjectStore {
        JsonlProjectStore::new(dir.path().join("projects")).unwrap()
    }

    #[test]
    fn create_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let created = store.create("proj-1", "Ship the thing", "user:alice").unwrap();
        assert_eq!(created.goal, "Ship the thing");
        assert_eq!(created.status, ProjectStatus::Planning);

        let loaded = store.load("proj-1").unwrap().unwrap();
        assert_eq!(loaded.goal, "Ship the thing");
        assert_eq!(loaded.events.len(), 1);
    }

    #[test]
    fn load_missing_project_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn append_transition_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal", "user:alice").unwrap();
        let updated = store
            .append("proj-1", "transitioned", "user:alice", serde_json::json!({"to": "awaiting_approval"}))
            .unwrap();
        assert_eq!(updated.status, ProjectStatus::AwaitingApproval);
    }

    #[test]
    fn append_to_missing_project_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let err = store.append("ghost", "transitioned", "user:alice", serde_json::json!({"to": "planning"}));
        assert!(matches!(err, Err(WorkflowError::NotFound(_))));
    }

    #[test]
    fn plan_set_recomputes_hash_and_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal", "user:alice").unwrap();
        let phases = vec![Phase {
            tasks: vec![TaskSpec::new("t1", "Do the work")],
            entry_criteria: vec![PhaseEntry::new("Ready")],
            ..Phase::new("p1", "Phase 1")
        }];
        let updated = store
            .append(
                "proj-1",
                "plan_set",
                "agent:planner",
                serde_json::json!({ "phases": phases, "terminal_conditions": Vec::<TerminalCondition>::new() }),
            )
            .unwrap();
        assert_eq!(updated.phases.len(), 1);
        assert!(!updated.plan_hash.is_empty());

        let reloaded = store.load("proj-1").unwrap().unwrap();
        assert_eq!(reloaded.plan_hash, updated.plan_hash);
    }

    #[test]
    fn budget_usage_accumulates_across_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal", "user:alice").unwrap();
        store.append("proj-1", "budget_set", "user:alice", serde_json::json!({"max_cost_usd": 10.0})).unwrap();
        store.append("proj-1", "budget_usage", "agent:worker-1", serde_json::json!({"cost_usd": 2.5})).unwrap();
        let updated = store.append("proj-1", "budget_usage", "agent:worker-1", serde_json::json!({"cost_usd": 1.5})).unwrap();
        assert!((updated.budget.cost_used_usd() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn phase_updated_sets_exit_criteria() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal", "user:alice").unwrap();
        store
            .append(
                "proj-1",
                "plan_set",
                "agent:planner",
                serde_json::json!({ "phases": [Phase::new("p1", "Phase 1")], "terminal_conditions": Vec::<TerminalCondition>::new() }),
            )
            .unwrap();
        let updated = store
            .append(
                "proj-1",
                "phase_updated",
                "agent:worker-1",
                serde_json::json!({
                    "phase_id": "p1",
                    "status": "done",
                    "exit_criteria": [PhaseEntry { description: "shipped".into(), met: true }],
                }),
            )
            .unwrap();
        assert_eq!(updated.phases[0].status, crate::models::PhaseStatus::Done);
        assert!(updated.phases[0].exit_criteria_met());
    }

    #[test]
    fn terminal_condition_updated_marks_met() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal", "user:alice").unwrap();
        store
            .append(
                "proj-1",
                "plan_set",
                "agent:planner",
                serde_json::json!({
                    "phases": Vec::<Phase>::new(),
                    "terminal_conditions": [TerminalCondition::new("All phases done", TerminalConditionType::PhaseCount)],
                }),
            )
            .unwrap();
        let updated = store
            .append(
                "proj-1",
                "terminal_condition_updated",
                "agent:reviewer",
                serde_json::json!({"description": "All phases done", "met": true}),
            )
            .unwrap();
        assert!(updated.terminal_conditions[0].met);
    }

    #[test]
    fn list_returns_all_created_projects() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal 1", "user:alice").unwrap();
        store.create("proj-2", "Goal 2", "user:alice").unwrap();
        let mut projects = store.list().unwrap();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].goal, "Goal 1");
        assert_eq!(projects[1].goal, "Goal 2");
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let store = StdArc::new(store(&dir));
        store.create("proj-1", "Goal", "user:alice").unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = StdArc::clone(&store);
                thread::spawn(move || {
                    store.append("proj-1", "budget_usage", "agent:worker", serde_json::json!({"cost_usd": 1.0, "wall_seconds": 0.0})).unwrap();
                    i
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let loaded = store.load("proj-1").unwrap().unwrap();
        // 1 creation event + 20 budget_usage events
        assert_eq!(loaded.events.len(), 21);
        assert!((loaded.budget.cost_used_usd() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn tags_set_replaces_tags() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("proj-1", "Goal", "user:alice").unwrap();
        let updated = store.append("proj-1", "tags_set", "user:alice", serde_json::json!({"tags": ["urgent", "infra"]})).unwrap();
        assert_eq!(updated.tags, vec!["urgent".to_string(), "infra".to_string()]);
    }
}
