// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Timezone-aware cron scheduler that produces gateway events.
//!
//! The scheduler never drives an agent directly: each firing constructs an
//! [`vigil_gateway::Event`] and hands it to [`vigil_gateway::Gateway::submit`].
//! A single tick task evaluates every registered heartbeat and job once a
//! second; firings for the same job id are coalesced so at most one instance
//! is outstanding at a time.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use vigil_gateway::{EventBuilder, EventSource, Gateway};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("heartbeat requires a prompt or prompt_fn")]
    MissingPrompt,
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),
}

fn default_call_type() -> String {
    "scheduled".to_string()
}

fn default_channel() -> String {
    "scheduled".to_string()
}

/// A config-driven or programmatically registered cron job.
#[derive(Debug, Clone)]
pub struct ScheduleJob {
    pub id: String,
    pub cron: String,
    pub timezone: Option<String>,
    pub prompt: Option<String>,
    pub call_type: String,
    pub channel: String,
    pub enabled: bool,
    pub metadata: Value,
}

impl ScheduleJob {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cron: cron.into(),
            timezone: None,
            prompt: Some(prompt.into()),
            call_type: default_call_type(),
            channel: default_channel(),
            enabled: true,
            metadata: json!({}),
        }
    }
}

impl From<&vigil_config::ScheduleJobConfig> for ScheduleJob {
    fn from(c: &vigil_config::ScheduleJobConfig) -> Self {
        Self {
            id: c.id.clone(),
            cron: c.cron.clone(),
            timezone: c.timezone.clone(),
            prompt: c.prompt.clone(),
            call_type: c.call_type.clone(),
            channel: c.channel.clone(),
            enabled: c.enabled,
            metadata: c.metadata.clone(),
        }
    }
}

/// Late-bound prompt source for a heartbeat. Evaluated fresh on every
/// firing; takes priority over a static `prompt` when both are set.
pub type PromptFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
struct Heartbeat {
    cron: String,
    timezone: Option<String>,
    prompt: Option<String>,
    prompt_fn: Option<PromptFn>,
    metadata: Value,
}

/// Produces [`vigil_gateway::Event`]s on a cron schedule and submits them to
/// a gateway. Owns no agent reference — it is a pure event producer.
pub struct Scheduler {
    gateway: Arc<Gateway>,
    heartbeats: Mutex<Vec<Heartbeat>>,
    jobs: Mutex<Vec<ScheduleJob>>,
    timezone: Mutex<Option<String>>,
    in_flight: Mutex<HashSet<String>>,
    running: AtomicBool,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    last_tick: Mutex<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            heartbeats: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            timezone: Mutex::new(None),
            in_flight: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            tick_handle: Mutex::new(None),
            last_tick: Mutex::new(Utc::now()),
        })
    }

    pub fn set_timezone(&self, tz: impl Into<String>) {
        *self.timezone.lock().unwrap_or_else(|e| e.into_inner()) = Some(tz.into());
    }

    /// Register a heartbeat. At least one of `prompt`/`prompt_fn` must be given.
    pub fn add_heartbeat(
        &self,
        cron: impl Into<String>,
        prompt: Option<String>,
        prompt_fn: Option<PromptFn>,
        metadata: Option<Value>,
    ) -> Result<(), SchedulerError> {
        if prompt.is_none() && prompt_fn.is_none() {
            return Err(SchedulerError::MissingPrompt);
        }
        self.heartbeats.lock().unwrap_or_else(|e| e.into_inner()).push(Heartbeat {
            cron: cron.into(),
            timezone: None,
            prompt,
            prompt_fn,
            metadata: metadata.unwrap_or_else(|| json!({})),
        });
        Ok(())
    }

    pub fn add_job(&self, job: ScheduleJob) {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).push(job);
    }

    /// Load enabled jobs from config. Disabled jobs are skipped entirely.
    pub fn add_jobs_from_config(&self, config: &vigil_config::SchedulerConfig) {
        for job_config in &config.jobs {
            if !job_config.enabled {
                continue;
            }
            self.add_job(ScheduleJob::from(job_config));
        }
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn fire_heartbeat(&self, hb: &Heartbeat) {
        let message = hb
            .prompt_fn
            .as_ref()
            .map(|f| f())
            .or_else(|| hb.prompt.clone())
            .unwrap_or_default();
        let mut metadata = hb.metadata.clone();
        if let Some(obj) = metadata.as_object_mut() {
            obj.entry("heartbeat_type").or_insert_with(|| json!("heartbeat"));
        }
        let builder = EventBuilder::new(EventSource::Heartbeat, message)
            .metadata(metadata)
            .call_type("heartbeat");
        self.gateway.submit(builder);
    }

    async fn fire_job(&self, job: &ScheduleJob) {
        let mut metadata = job.metadata.clone();
        match metadata.as_object_mut() {
            Some(obj) => {
                obj.insert("job_id".to_string(), json!(job.id));
            }
            None => metadata = json!({"job_id": job.id}),
        }
        let builder = EventBuilder::new(EventSource::Scheduled, job.prompt.clone().unwrap_or_default())
            .metadata(metadata)
            .call_type(job.call_type.clone())
            .channel(job.channel.clone());
        self.gateway.submit(builder);
    }

    /// Idempotent: a second call while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.last_tick.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.tick_loop().await });
        *self.tick_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Idempotent: shutting down a scheduler that isn't running is a no-op.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.tick_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn resolve_tz(&self, job_tz: &Option<String>) -> Tz {
        let fallback = self.timezone.lock().unwrap_or_else(|e| e.into_inner()).clone();
        job_tz
            .as_deref()
            .or(fallback.as_deref())
            .and_then(|name| Tz::from_str(name).ok())
            .unwrap_or(chrono_tz::UTC)
    }

    async fn tick_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let now = Utc::now();
            let last = {
                let mut guard = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
                let prev = *guard;
                *guard = now;
                prev
            };

            let heartbeats = self.heartbeats.lock().unwrap_or_else(|e| e.into_inner()).clone();
            for hb in heartbeats {
                if self.due(&hb.cron, &hb.timezone, last, now) {
                    let this = Arc::clone(&self);
                    let hb = hb.clone();
                    tokio::spawn(async move { this.fire_heartbeat(&hb).await });
                }
            }

            let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone();
            for job in jobs {
                if !job.enabled {
                    continue;
                }
                if !self.due(&job.cron, &job.timezone, last, now) {
                    continue;
                }
                {
                    let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                    if !in_flight.insert(job.id.clone()) {
                        continue; // previous firing still outstanding — coalesce
                    }
                }
                let this = Arc::clone(&self);
                let job_for_task = job.clone();
                tokio::spawn(async move {
                    this.fire_job(&job_for_task).await;
                    this.in_flight.lock().unwrap_or_else(|e| e.into_inner()).remove(&job_for_task.id);
                });
            }
        }
    }

    fn due(&self, expr: &str, job_tz: &Option<String>, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Ok(schedule) = parse_schedule(expr) else {
            return false;
        };
        let tz = self.resolve_tz(job_tz);
        let last_tz = last.with_timezone(&tz);
        let now_tz = now.with_timezone(&tz);
        schedule.after(&last_tz).next().map(|t| t <= now_tz).unwrap_or(false)
    }
}

fn parse_schedule(expr: &str) -> Result<Schedule, SchedulerError> {
    let field_count = expr.split_whitespace().count();
    let normalized = if field_count <= 5 { format!("0 {expr}") } else { expr.to_string() };
    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron(expr.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_gateway::{AgentHandler, Event, GatewayConfig};

    struct NoopHandler;
    #[async_trait::async_trait]
    impl AgentHandler for NoopHandler {
        async fn invoke(&self, event: &Event) -> anyhow::Result<String> {
            Ok(event.message.clone())
        }
    }

    fn gateway() -> Arc<Gateway> {
        Gateway::new(Arc::new(NoopHandler), GatewayConfig::default())
    }

    fn scheduler() -> Arc<Scheduler> {
        Scheduler::new(gateway())
    }

    #[test]
    fn schedule_job_defaults() {
        let job = ScheduleJob::new("test", "do thing", "0 9 * * *");
        assert_eq!(job.call_type, "scheduled");
        assert_eq!(job.channel, "scheduled");
        assert!(job.enabled);
        assert_eq!(job.metadata, json!({}));
    }

    #[test]
    fn add_heartbeat_requires_prompt_or_prompt_fn() {
        let s = scheduler();
        let err = s.add_heartbeat("0 9 * * *", None, None, None).unwrap_err();
        assert!(matches!(err, SchedulerError::MissingPrompt));
    }

    #[test]
    fn add_heartbeat_with_prompt() {
        let s = scheduler();
        s.add_heartbeat("0 9 * * *", Some("check in".into()), None, None).unwrap();
        assert_eq!(s.heartbeat_count(), 1);
    }

    #[test]
    fn add_heartbeat_with_prompt_fn() {
        let s = scheduler();
        let f: PromptFn = Arc::new(|| "dynamic prompt".to_string());
        s.add_heartbeat("0 9 * * *", None, Some(f), None).unwrap();
        assert_eq!(s.heartbeat_count(), 1);
    }

    #[test]
    fn add_job_registers_it() {
        let s = scheduler();
        s.add_job(ScheduleJob::new("brief", "morning brief", "55 8 * * *"));
        assert_eq!(s.job_count(), 1);
    }

    #[test]
    fn add_jobs_from_config_skips_disabled() {
        let s = scheduler();
        let config = vigil_config::SchedulerConfig {
            jobs: vec![
                vigil_config::ScheduleJobConfig {
                    id: "morning_brief".into(),
                    cron: "55 8 * * *".into(),
                    timezone: Some("America/Los_Angeles".into()),
                    prompt: Some("[BRIEF] Run morning brief.".into()),
                    call_type: "scheduled".into(),
                    channel: "heartbeat".into(),
                    enabled: true,
                    metadata: json!({}),
                },
                vigil_config::ScheduleJobConfig {
                    id: "disabled_job".into(),
                    cron: "0 12 * * *".into(),
                    timezone: None,
                    prompt: Some("skip me".into()),
                    call_type: "scheduled".into(),
                    channel: "scheduled".into(),
                    enabled: false,
                    metadata: json!({}),
                },
            ],
        };
        s.add_jobs_from_config(&config);
        assert_eq!(s.job_count(), 1);
        assert_eq!(s.jobs.lock().unwrap()[0].id, "morning_brief");
    }

    #[tokio::test]
    async fn fire_heartbeat_creates_event() {
        let s = scheduler();
        let hb = Heartbeat {
            cron: "0 9 * * *".into(),
            timezone: None,
            prompt: Some("check in".into()),
            prompt_fn: None,
            metadata: json!({"heartbeat_type": "morning"}),
        };
        s.fire_heartbeat(&hb).await;
        // fire_heartbeat hands off to gateway.submit, which spawns a task;
        // give it a tick to enqueue before we assert no panic occurred.
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn fire_heartbeat_prefers_prompt_fn() {
        let s = scheduler();
        let f: PromptFn = Arc::new(|| "dynamic prompt text".to_string());
        let hb = Heartbeat {
            cron: "0 9 * * *".into(),
            timezone: None,
            prompt: Some("fallback".into()),
            prompt_fn: Some(f),
            metadata: json!({}),
        };
        // Can't directly observe the built Event without a response handler;
        // exercised end-to-end via the gateway-level tests instead. Here we
        // just assert the call completes without panicking.
        s.fire_heartbeat(&hb).await;
    }

    #[tokio::test]
    async fn fire_job_creates_event() {
        let s = scheduler();
        let job = ScheduleJob {
            id: "brief".into(),
            cron: "0 0 * * *".into(),
            timezone: None,
            prompt: Some("run brief".into()),
            call_type: "scheduled".into(),
            channel: "heartbeat".into(),
            enabled: true,
            metadata: json!({}),
        };
        s.fire_job(&job).await;
    }

    #[tokio::test]
    async fn start_and_shutdown_lifecycle() {
        let s = scheduler();
        s.add_heartbeat("59 23 * * *", Some("late night".into()), None, None).unwrap();
        s.start();
        assert!(s.is_running());
        s.start(); // idempotent
        s.shutdown();
        assert!(!s.is_running());
        s.shutdown(); // idempotent
    }

    #[test]
    fn normalizes_five_field_cron_by_prepending_seconds() {
        assert!(parse_schedule("0 9 * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_cron() {
        assert!(parse_schedule("not a cron").is_err());
    }
}
