// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};

use vigil_approval::ApprovalStore;
use vigil_circuit::{CircuitBreakerConfig, CircuitRegistry};
use vigil_clock::{BudgetLedger, Clock, LedgerConfig, SystemClock};
use vigil_config::Config;
use vigil_core::{ApprovalDecision, ApprovalPrompter, NonInteractiveApprovalPrompter};
use vigil_gateway::{AgentHandler, Event, EventBuilder, EventSource, Gateway, GatewayConfig};
use vigil_model::{
    AuthProfile, AuthProfileManager, Invoker, InvokerConfig, MockProvider, ModelClasses,
    ModelProvider, ModelSelector, ModelSpec, SelectorConfig,
};
use vigil_scheduler::Scheduler;
use vigil_session::{JsonlSessionStore, Session as StoredSession, SessionFilter, SessionStore, Turn};
use vigil_tools::{
    AskQuestionTool, GlobFileSearchTool, GrepTool, LayeredToolPolicy, ListDirTool, ReadFileTool,
    RunTerminalCommandTool, ToolRegistry, WebFetchTool, WebSearchTool, WriteTool,
};
use vigil_workflow::{
    AgentRunner, DefaultTerminalConditionEvaluator, JsonlProjectStore, TaskSpec, WorkerPool,
    WorkflowOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        return run_subcommand(cmd, cli.config.as_deref()).await;
    }

    let config = vigil_config::load(cli.config.as_deref())?;
    let runtime = Runtime::build(config)?;

    match cli.message {
        Some(message) => run_one_shot(&runtime, &message, cli.mode.as_deref()).await,
        None => run_service(runtime).await,
    }
}

async fn run_subcommand(cmd: &Commands, config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    match cmd {
        Commands::ShowConfig => {
            let config = vigil_config::load(config_path)?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
        Commands::Sessions { limit } => {
            let config = vigil_config::load(config_path)?;
            let store = open_session_store(&config)?;
            let sessions = store.list(SessionFilter { limit: Some(*limit), ..Default::default() })?;
            if sessions.is_empty() {
                println!("no sessions recorded");
                return Ok(());
            }
            for s in sessions {
                println!("{}  {:<10} {:<12} started={}", s.id, s.agent_name, s.channel, s.started);
            }
            Ok(())
        }
        Commands::Projects => {
            let config = vigil_config::load(config_path)?;
            let store = JsonlProjectStore::new(project_dir(&config))?;
            let projects = vigil_workflow::ProjectStore::list(&store)?;
            if projects.is_empty() {
                println!("no projects");
                return Ok(());
            }
            for p in projects {
                println!("{}  {:?}  {}", p.id, p.status, p.goal);
            }
            Ok(())
        }
    }
}

async fn run_one_shot(runtime: &Runtime, message: &str, mode: Option<&str>) -> anyhow::Result<()> {
    runtime.gateway.start().await;
    let mut builder = EventBuilder::new(EventSource::Message, message.to_string())
        .channel("cli")
        .with_future();
    if let Some(mode) = mode {
        builder = builder.metadata(serde_json::json!({ "mode": mode }));
    }
    let reply = runtime.gateway.submit_for_response(builder).await;
    runtime.gateway.stop().await;
    match reply {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(err) => Err(anyhow::anyhow!("{err}")),
    }
}

/// Starts the scheduler and gateway, then treats each line of stdin as a
/// message-sourced event. Exits cleanly on EOF or SIGINT.
async fn run_service(runtime: Runtime) -> anyhow::Result<()> {
    runtime.gateway.start().await;
    runtime.scheduler.start();
    info!(
        jobs = runtime.scheduler.job_count(),
        heartbeats = runtime.scheduler.heartbeat_count(),
        "vigil service started"
    );

    let gateway = Arc::clone(&runtime.gateway);
    let stdin_task = tokio::task::spawn_blocking(move || {
        let handle = tokio::runtime::Handle::current();
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let gateway = Arc::clone(&gateway);
            let builder = EventBuilder::new(EventSource::Message, line).channel("stdin").with_future();
            handle.block_on(async move {
                match gateway.submit_for_response(builder).await {
                    Ok(reply) => println!("{reply}"),
                    Err(err) => eprintln!("[vigil:error] {err}"),
                }
            });
        }
    });

    tokio::select! {
        _ = stdin_task => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    runtime.scheduler.shutdown();
    runtime.gateway.stop().await;
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn session_dir(config: &Config) -> std::path::PathBuf {
    config
        .session
        .data_dir
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| vigil_config::data_dir().join("sessions"))
}

fn project_dir(config: &Config) -> std::path::PathBuf {
    let _ = config;
    vigil_config::data_dir().join("projects")
}

fn budget_dir(config: &Config) -> std::path::PathBuf {
    config
        .budget
        .data_dir
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| vigil_config::data_dir())
}

fn open_session_store(config: &Config) -> anyhow::Result<JsonlSessionStore> {
    Ok(JsonlSessionStore::new(session_dir(config))?)
}

/// Wired-up collaborators shared by the gateway handler, the scheduler and
/// the workflow orchestrator's worker pool. Assembled once at startup.
struct Runtime {
    gateway: Arc<Gateway>,
    scheduler: Arc<Scheduler>,
    #[allow(dead_code)]
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl Runtime {
    fn build(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let ledger = BudgetLedger::with_clock(
            LedgerConfig {
                data_dir: budget_dir(&config),
                daily_limit: config.budget.daily_limit,
                fail_open_on_error: config.budget.fail_open,
            },
            Arc::clone(&clock),
        );
        let circuits = Arc::new(CircuitRegistry::new(
            CircuitBreakerConfig {
                failure_threshold: config.circuit.failure_threshold,
                open_duration: Duration::from_secs(config.circuit.open_duration_secs),
                history_size: config.circuit.history_size,
            },
            Arc::clone(&clock),
        ));

        let data_dir = vigil_config::data_dir();
        std::fs::create_dir_all(&data_dir).context("creating vigil data directory")?;
        let approvals = Arc::new(ApprovalStore::load(data_dir.join("approval_grants.json"))?);

        let auth = Arc::new(AuthProfileManager::new(auth_profiles_from_config(&config), Arc::clone(&clock)));
        let invoker = Arc::new(Invoker::new(Arc::new(ledger), Arc::clone(&circuits), auth, InvokerConfig::default()));

        let selector = Arc::new(ModelSelector::new(
            ModelClasses {
                light: ModelSpec::new(&config.model.classes.light.provider, &config.model.classes.light.name),
                heavy: ModelSpec::new(&config.model.classes.heavy.provider, &config.model.classes.heavy.name),
                thinking: ModelSpec::new(&config.model.classes.thinking.provider, &config.model.classes.thinking.name),
                default: ModelSpec::new(&config.model.classes.default.provider, &config.model.classes.default.name),
            },
            SelectorConfig {
                heavy_modes: config.model.heavy_modes.iter().cloned().collect(),
                light_modes: config.model.light_modes.iter().cloned().collect(),
                complex_threshold: config.model.complex_threshold,
                complex_keywords: config.model.complex_keywords.clone(),
            },
            Arc::clone(&circuits),
        ));

        // Real vendor wire protocols are out of scope; the mock provider is
        // the only backend wired up, matching `ModelClassesConfig::default`'s
        // provider-agnostic fallback class.
        let providers: HashMap<String, Arc<dyn ModelProvider>> =
            HashMap::from([("mock/mock-model".to_string(), Arc::new(MockProvider) as Arc<dyn ModelProvider>)]);

        let approval_prompter: Arc<dyn ApprovalPrompter> = Arc::new(CommandApprovalPrompter::new(
            &config.tools.auto_approve_patterns,
            &config.tools.deny_patterns,
            Arc::new(NonInteractiveApprovalPrompter),
        ));

        let worker_tools = Arc::new(register_builtin_tools(ToolRegistry::new(), &config));

        let project_store = Arc::new(JsonlProjectStore::new(project_dir(&config))?);
        let evaluator = Arc::new(DefaultTerminalConditionEvaluator::new());
        let runner = Arc::new(VigilAgentRunner {
            providers: providers.clone(),
            selector: Arc::clone(&selector),
            invoker: Arc::clone(&invoker),
            circuits: Arc::clone(&circuits),
            approvals: Arc::clone(&approvals),
            approval_prompter: Arc::clone(&approval_prompter),
            config: Arc::clone(&config),
        });
        let pool = Arc::new(WorkerPool::new(runner, worker_tools, 4));
        let orchestrator = Arc::new(WorkflowOrchestrator::new(project_store, pool, evaluator));

        let mut agent_tools = register_builtin_tools(ToolRegistry::new(), &config);
        for tool in vigil_workflow::workflow_tools(Arc::clone(&orchestrator)) {
            agent_tools.register_boxed(tool);
        }
        let agent_tools = Arc::new(agent_tools);

        let session_store: Arc<dyn SessionStore> = Arc::new(open_session_store(&config)?);

        let handler = Arc::new(VigilAgentHandler {
            tools: agent_tools,
            policy: LayeredToolPolicy::new(),
            providers,
            selector,
            invoker,
            circuits,
            approvals,
            approval_prompter,
            config: Arc::clone(&config),
            sessions: session_store,
            session: tokio::sync::Mutex::new(None),
        });

        let gateway = Gateway::new(handler, GatewayConfig::default());
        let scheduler = Scheduler::new(Arc::clone(&gateway));
        scheduler.add_jobs_from_config(&config.scheduler);

        Ok(Self { gateway, scheduler, orchestrator })
    }
}

fn auth_profiles_from_config(config: &Config) -> Vec<AuthProfile> {
    if config.providers.is_empty() {
        return vec![AuthProfile::new("mock", "mock", "")];
    }
    config
        .providers
        .iter()
        .map(|(name, creds)| {
            let key = creds
                .api_key
                .clone()
                .or_else(|| creds.api_key_env.as_deref().and_then(|var| std::env::var(var).ok()))
                .unwrap_or_default();
            AuthProfile::new(name, name, key)
        })
        .collect()
}

fn register_builtin_tools(mut registry: ToolRegistry, config: &Config) -> ToolRegistry {
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(ListDirTool);
    registry.register(GlobFileSearchTool);
    registry.register(GrepTool);
    registry.register(WebFetchTool);
    registry.register(WebSearchTool { api_key: config.tools.web.search.api_key.clone() });
    registry.register(RunTerminalCommandTool { timeout_secs: config.tools.timeout_secs });
    registry.register(AskQuestionTool::new_headless());
    registry
}

/// Glob-pattern command approval (§4.4's auto-approve/deny lists). Only
/// `run_terminal_command` calls are matched against a pattern (the
/// `command` argument); every other tool falls through to `fallback`.
struct CommandApprovalPrompter {
    auto_patterns: Vec<regex::Regex>,
    deny_patterns: Vec<regex::Regex>,
    fallback: Arc<dyn ApprovalPrompter>,
}

impl CommandApprovalPrompter {
    fn new(auto: &[String], deny: &[String], fallback: Arc<dyn ApprovalPrompter>) -> Self {
        Self {
            auto_patterns: auto.iter().filter_map(|p| glob_to_regex(p)).collect(),
            deny_patterns: deny.iter().filter_map(|p| glob_to_regex(p)).collect(),
            fallback,
        }
    }
}

#[async_trait]
impl ApprovalPrompter for CommandApprovalPrompter {
    async fn request(&self, tool_name: &str, args: &Value) -> ApprovalDecision {
        if tool_name != "run_terminal_command" {
            return self.fallback.request(tool_name, args).await;
        }
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return self.fallback.request(tool_name, args).await;
        };
        if self.deny_patterns.iter().any(|re| re.is_match(command)) {
            return ApprovalDecision::Decline;
        }
        if self.auto_patterns.iter().any(|re| re.is_match(command)) {
            return ApprovalDecision::Approve;
        }
        self.fallback.request(tool_name, args).await
    }

    fn decline_message(&self) -> &'static str {
        self.fallback.decline_message()
    }
}

/// Converts a simple shell glob (`*` = anything, `?` = one char) to a `Regex`.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}

/// Bridges a `vigil_gateway::Event` to `vigil_core::Agent::chat`. Every
/// invocation builds a fresh `Agent` (cheap: everything it holds is an
/// `Arc`) so per-turn session state never leaks across unrelated events;
/// the gateway's single consumer task already serializes calls.
struct VigilAgentHandler {
    tools: Arc<ToolRegistry>,
    policy: LayeredToolPolicy,
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    selector: Arc<ModelSelector>,
    invoker: Arc<Invoker>,
    circuits: Arc<CircuitRegistry>,
    approvals: Arc<ApprovalStore>,
    approval_prompter: Arc<dyn ApprovalPrompter>,
    config: Arc<Config>,
    sessions: Arc<dyn SessionStore>,
    session: tokio::sync::Mutex<Option<String>>,
}

#[async_trait]
impl AgentHandler for VigilAgentHandler {
    async fn invoke(&self, event: &Event) -> anyhow::Result<String> {
        let mut agent = vigil_core::Agent::new(
            Arc::clone(&self.tools),
            self.policy.clone(),
            self.providers.clone(),
            Arc::clone(&self.selector),
            Arc::clone(&self.invoker),
            Arc::clone(&self.circuits),
            Arc::clone(&self.approvals),
            Arc::new(self.config.agent.clone()),
        )
        .with_approval_prompter(Arc::clone(&self.approval_prompter));

        let channel = event.channel.as_deref();
        let mode = event.metadata.get("mode").and_then(Value::as_str);
        let result = agent.chat(&event.message, mode, channel, None).await;

        let session_id = self.ensure_session(channel.unwrap_or("default")).await;
        if let Err(err) = self.sessions.append_turn(&session_id, &Turn::new("user", &event.message)) {
            warn!(error = %err, "failed to persist user turn");
        }
        if let Err(err) = self.sessions.append_turn(
            &session_id,
            &Turn::new("assistant", &result.text)
                .with_metadata(serde_json::json!({ "model": result.model, "tool_calls": result.tool_calls.len() })),
        ) {
            warn!(error = %err, "failed to persist assistant turn");
        }

        Ok(result.text)
    }
}

impl VigilAgentHandler {
    async fn ensure_session(&self, channel: &str) -> String {
        let mut guard = self.session.lock().await;
        if let Some(id) = guard.as_ref() {
            return id.clone();
        }
        let session = StoredSession::new("vigil", channel);
        let id = session.id.clone();
        if let Err(err) = self.sessions.create(&session) {
            warn!(error = %err, "failed to create session record");
        }
        *guard = Some(id.clone());
        id
    }
}

/// Bridges the workflow orchestrator's worker pool back to the agent loop:
/// each task runs through a freshly constructed `Agent` scoped to the tool
/// set and policy the pool hands in (the per-task tool allowlist).
struct VigilAgentRunner {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    selector: Arc<ModelSelector>,
    invoker: Arc<Invoker>,
    circuits: Arc<CircuitRegistry>,
    approvals: Arc<ApprovalStore>,
    approval_prompter: Arc<dyn ApprovalPrompter>,
    config: Arc<Config>,
}

#[async_trait]
impl AgentRunner for VigilAgentRunner {
    async fn run_task(&self, task: &TaskSpec, tools: Arc<ToolRegistry>, policy: LayeredToolPolicy) -> anyhow::Result<String> {
        let mut agent = vigil_core::Agent::new(
            tools,
            policy,
            self.providers.clone(),
            Arc::clone(&self.selector),
            Arc::clone(&self.invoker),
            Arc::clone(&self.circuits),
            Arc::clone(&self.approvals),
            Arc::new(self.config.agent.clone()),
        )
        .with_approval_prompter(Arc::clone(&self.approval_prompter));

        let result = agent
            .chat(&task.description, None, Some("workflow"), Some(task.max_attempts.max(1)))
            .await;
        Ok(result.text)
    }
}
