//! Scheduler
//!
//! The agent's single cooperative loop. One pass:
//!
//! 1. Drain and apply a batch of steering commands
//! 2. If paused, wait and try again
//! 3. Ask admission control; when denied, go `Throttled` and back off
//! 4. `Thinking`: refresh the memory context if due, build the prompt, call the LLM
//! 5. `Acting`: run requested tools concurrently, one action per call
//! 6. Record the thought and the consumed budget, go `Idle`, sleep
//!
//! A failed iteration moves the agent to `Error` and the loop carries on after
//! a delay. Only cancellation ends the loop; every sleep and external await
//! observes it.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use sdk::errors::{EngineError, EngineErrorExt};
use sdk::types::{
    summarize, Action, ActionStatus, AgentStatus, MemoryEntry, MemoryType, Thought, ThoughtContent,
    ThoughtType, ToolCallRecord, MAX_RECENT_ACTIONS,
};
use sdk::SteeringCommand;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::prompt::{build_messages, PromptInput};
use super::WorkingMemory;
use crate::admission::{backoff_duration, time_until_reset, AdmissionController};
use crate::config::Config;
use crate::llm::{LLMProvider, LLMResponse, Message, ToolCall};
use crate::memory::{
    retry, ConsolidationService, LongTermStore, MemoryContextBuilder, RetryPolicy,
};
use crate::state::StateManager;
use crate::steering::{CommandQueue, DEFAULT_DRAIN_BATCH};
use crate::tools::ToolRegistry;

/// Longest tool output kept on an action record
const MAX_ACTION_OUTPUT_CHARS: usize = 4000;

pub const CODE_REVIEW_TAG: &str = "code-review";
pub const ITERATION_ERROR_TAG: &str = "iteration-error";

const SUMMARY_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub think_interval: Duration,
    pub error_delay: Duration,
    pub llm_timeout: Duration,
    pub drain_batch: usize,
    pub context_token_limit: usize,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            think_interval: config.agent.think_interval(),
            error_delay: config.agent.error_delay(),
            llm_timeout: config.agent.llm_timeout(),
            drain_batch: DEFAULT_DRAIN_BATCH,
            context_token_limit: config.agent.context_token_limit,
        }
    }
}

/// Collaborators the scheduler drives
pub struct AgentServices {
    pub state: Arc<StateManager>,
    pub admission: Arc<AdmissionController>,
    pub context: MemoryContextBuilder,
    pub consolidation: Arc<ConsolidationService>,
    pub long_term: Arc<dyn LongTermStore>,
    pub llm: Arc<dyn LLMProvider>,
    pub tools: ToolRegistry,
    pub steering: CommandQueue,
    pub retry: RetryPolicy,
}

/// Outcome of one pass through the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Ran,
    Paused,
    Throttled(Duration),
}

pub struct Scheduler {
    state: Arc<StateManager>,
    admission: Arc<AdmissionController>,
    context: MemoryContextBuilder,
    consolidation: Arc<ConsolidationService>,
    long_term: Arc<dyn LongTermStore>,
    llm: Arc<dyn LLMProvider>,
    tools: ToolRegistry,
    steering: CommandQueue,
    retry: RetryPolicy,
    settings: SchedulerSettings,
    history: WorkingMemory,
    chat_inbox: Vec<String>,
    consecutive_throttles: u32,
    iteration: u64,
}

/// Whether `err` stems from cancellation
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<EngineError>(),
            Some(EngineError::Cancelled)
        )
    })
}

/// True when a transient engine error sits anywhere in the chain
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<EngineError>()
            .is_some_and(|e| e.is_transient())
    })
}

/// Await `fut` unless `cancel` fires first
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled.into()),
        result = fut => result,
    }
}

/// Sleep for `duration`; false when cancelled first
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn truncate_output(output: &str) -> String {
    if output.chars().count() <= MAX_ACTION_OUTPUT_CHARS {
        output.to_string()
    } else {
        let cut: String = output.chars().take(MAX_ACTION_OUTPUT_CHARS).collect();
        format!("{}\n[truncated]", cut)
    }
}

impl Scheduler {
    pub fn new(services: AgentServices, settings: SchedulerSettings) -> Self {
        Self {
            state: services.state,
            admission: services.admission,
            context: services.context,
            consolidation: services.consolidation,
            long_term: services.long_term,
            llm: services.llm,
            tools: services.tools,
            steering: services.steering,
            retry: services.retry,
            history: WorkingMemory::with_limit(settings.context_token_limit),
            settings,
            chat_inbox: Vec::new(),
            consecutive_throttles: 0,
            iteration: 0,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn history(&self) -> &WorkingMemory {
        &self.history
    }

    pub fn memory_context(&self) -> &str {
        self.context.current_context()
    }

    /// Load state and memory context before the first pass
    pub async fn prepare(&mut self) {
        self.iteration = self.state.snapshot().await.iteration;
        if let Err(e) = self.context.load(self.iteration, Utc::now()).await {
            warn!("Initial memory context load failed: {}", e);
        }
    }

    /// Run until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        self.prepare().await;
        info!(
            "Scheduler started with {} (think interval {:?}, resuming at iteration {})",
            self.llm.name(),
            self.settings.think_interval,
            self.iteration
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let pause = match self.tick(&cancel).await {
                Ok(Tick::Ran) | Ok(Tick::Paused) => self.settings.think_interval,
                Ok(Tick::Throttled(wait)) => wait,
                Err(e) if is_cancelled(&e) => break,
                Err(e) => {
                    self.handle_failure(&e).await;
                    self.settings.error_delay
                }
            };

            if !sleep_or_cancel(&cancel, pause).await {
                break;
            }
        }

        info!("Scheduler stopped at iteration {}", self.iteration);
    }

    /// One pass: steering, pause check, admission, then an iteration
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<Tick> {
        self.apply_steering(cancel).await?;

        if self.state.snapshot().await.status == AgentStatus::Paused {
            debug!("Agent paused; skipping iteration");
            return Ok(Tick::Paused);
        }

        let decision = self
            .admission
            .can_proceed()
            .await
            .context("Admission check failed")?;
        if !decision.allowed {
            self.consecutive_throttles += 1;
            let until_reset = time_until_reset(Utc::now()).max(Duration::from_secs(1));
            let wait = backoff_duration(self.consecutive_throttles).min(until_reset);
            warn!(
                "Throttled: {} (backing off {:?}, {} in a row)",
                decision.reason.as_deref().unwrap_or("budget exhausted"),
                wait,
                self.consecutive_throttles
            );
            self.state
                .set_status(AgentStatus::Throttled)
                .await
                .context("Failed to set throttled status")?;
            return Ok(Tick::Throttled(wait));
        }
        if self.consecutive_throttles > 0 {
            info!(
                "Admission reopened after {} throttled checks",
                self.consecutive_throttles
            );
            self.consecutive_throttles = 0;
        }

        self.iteration += 1;
        let span = info_span!("iteration", n = self.iteration);
        self.run_iteration(cancel).instrument(span).await?;
        Ok(Tick::Ran)
    }

    async fn run_iteration(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.state
            .set_iteration(self.iteration)
            .await
            .context("Failed to record iteration")?;
        self.state
            .set_status(AgentStatus::Thinking)
            .await
            .context("Failed to set thinking status")?;

        match self.context.refresh_if_due(self.iteration, Utc::now()).await {
            Ok(true) => debug!("Memory context refreshed"),
            Ok(false) => {}
            Err(e) => warn!(
                "Memory context refresh failed, keeping previous context: {}",
                e
            ),
        }

        let operator_messages = std::mem::take(&mut self.chat_inbox);
        let snapshot = self.state.snapshot().await;
        let messages = build_messages(&PromptInput {
            state: &snapshot,
            memory_context: self.context.current_context(),
            tools: &self.tools,
            history: self.history.messages(),
            operator_messages: &operator_messages,
        });

        let response = match cancellable(cancel, self.generate(&messages)).await {
            Ok(response) => response,
            Err(e) => {
                // Operator chat is not lost with a failed call
                self.chat_inbox.splice(0..0, operator_messages);
                return Err(e);
            }
        };
        debug!(
            "LLM returned {} chars and {} tool calls",
            response.content.len(),
            response.tool_calls.len()
        );

        for message in &operator_messages {
            self.history
                .add_message(Message::user(format!("Operator: {}", message)));
        }
        self.history
            .add_message(Message::assistant(response.content.clone()));

        let (content, declared) = ThoughtContent::classify(&response.content);
        let thought_type = declared.unwrap_or(if response.tool_calls.is_empty() {
            ThoughtType::Reasoning
        } else {
            ThoughtType::Decision
        });

        let records = if response.tool_calls.is_empty() {
            Vec::new()
        } else {
            self.state
                .set_status(AgentStatus::Acting)
                .await
                .context("Failed to set acting status")?;
            cancellable(cancel, self.execute_tools(&response.tool_calls)).await?
        };
        for record in &records {
            let output = record.output.as_deref().unwrap_or_default();
            self.history.add_message(Message::tool_result(
                format!("{} -> {}", record.name, output),
                &record.id,
            ));
        }

        let thought = Thought::new(thought_type, content).with_tool_calls(records);
        let thought_id = thought.id.clone();
        self.state
            .add_thought(thought)
            .await
            .with_context(|| format!("Failed to record thought {}", thought_id))?;

        let tokens = response.tokens_used(&messages);
        self.admission
            .record_consumption(tokens)
            .await
            .context("Failed to record consumption")?;

        self.state
            .set_status(AgentStatus::Idle)
            .await
            .context("Failed to set idle status")?;

        info!(
            "Iteration complete: thought {} ({}), ~{} tokens",
            thought_id,
            thought_type.as_str(),
            tokens
        );
        Ok(())
    }

    async fn generate(&self, messages: &[Message]) -> Result<LLMResponse> {
        let llm = self.llm.clone();
        let timeout = self.settings.llm_timeout;
        retry(&self.retry, "llm generate", || {
            let llm = llm.clone();
            async move {
                match tokio::time::timeout(timeout, llm.generate(messages)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::LLMTimeout),
                }
            }
        })
        .await
        .with_context(|| format!("LLM call to {} failed", self.llm.name()))
    }

    /// Record one pending action per call, then run them all concurrently
    async fn execute_tools(&self, calls: &[ToolCall]) -> Result<Vec<ToolCallRecord>> {
        // Each action has to stay in the bounded view until it finishes
        if calls.len() > MAX_RECENT_ACTIONS {
            warn!(
                "Model requested {} tool calls; running the first {}",
                calls.len(),
                MAX_RECENT_ACTIONS
            );
        }
        let calls = &calls[..calls.len().min(MAX_RECENT_ACTIONS)];

        let mut actions = Vec::with_capacity(calls.len());
        for call in calls {
            let action = Action::pending(&call.name, &call.arguments);
            let id = action.id.clone();
            self.state
                .add_action(action)
                .await
                .with_context(|| format!("Failed to record action {}", id))?;
            actions.push(id);
        }

        let runs = calls
            .iter()
            .zip(&actions)
            .map(|(call, action_id)| self.run_action(call, action_id));
        join_all(runs).await.into_iter().collect()
    }

    /// Tool failures end the action as `Failed`; only bookkeeping errors propagate
    async fn run_action(&self, call: &ToolCall, action_id: &str) -> Result<ToolCallRecord> {
        self.state
            .update_action(action_id, ActionStatus::Running, None)
            .await
            .with_context(|| format!("Failed to start action {}", action_id))?;

        let (status, output) = match self.tools.dispatch(&call.name, &call.arguments).await {
            Ok(output) => (ActionStatus::Completed, truncate_output(&output)),
            Err(e) => {
                let failure = EngineError::ActionExecutionFailed {
                    id: action_id.to_string(),
                    reason: e.to_string(),
                };
                warn!("{}", failure);
                (ActionStatus::Failed, format!("ERROR: {}", e))
            }
        };

        self.state
            .update_action(action_id, status, Some(output.clone()))
            .await
            .with_context(|| format!("Failed to finish action {}", action_id))?;

        Ok(ToolCallRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            succeeded: status == ActionStatus::Completed,
            output: Some(output),
        })
    }

    async fn apply_steering(&mut self, cancel: &CancellationToken) -> Result<()> {
        let commands = match self.steering.drain(self.settings.drain_batch).await {
            Ok(commands) => commands,
            Err(e) => {
                warn!("Failed to drain steering commands: {:#}", e);
                return Ok(());
            }
        };

        for command in commands {
            let name = command.name().to_string();
            let Err(e) = self.apply_command(command.clone(), cancel).await else {
                continue;
            };
            if is_cancelled(&e) {
                return Err(e);
            }
            if !is_transient(&e) {
                warn!("Steering command {} failed: {:#}", name, e);
                continue;
            }

            warn!("Steering command {} failed, requeueing: {:#}", name, e);
            if let Err(requeue) = self.steering.enqueue(&command).await {
                error!("Dropping steering command {}: {:#}", name, requeue);
            }
        }
        Ok(())
    }

    /// Apply one operator command
    pub async fn apply_command(
        &mut self,
        command: SteeringCommand,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Applying steering command {}", command.name());

        match command {
            SteeringCommand::UpdatePrompt(prompt) => {
                self.state.set_prompt(prompt).await?;
            }
            SteeringCommand::PauseAgent => {
                self.state.set_status(AgentStatus::Paused).await?;
            }
            SteeringCommand::ResumeAgent => {
                if self.state.snapshot().await.status == AgentStatus::Paused {
                    self.state.set_status(AgentStatus::Idle).await?;
                }
            }
            SteeringCommand::TriggerMemoryConsolidation => {
                let consolidation = Arc::clone(&self.consolidation);
                let report = cancellable(cancel, async move {
                    consolidation
                        .run_once()
                        .await
                        .context("Manual consolidation failed")
                })
                .await?;
                info!(
                    "Manual consolidation: {} scanned, {} promoted, {} learnings",
                    report.scanned, report.promoted, report.learnings
                );
                self.context.invalidate();
            }
            SteeringCommand::TriggerBatchLearning => {
                let consolidation = Arc::clone(&self.consolidation);
                let created = cancellable(cancel, async move {
                    consolidation
                        .batch_learning()
                        .await
                        .context("Batch learning failed")
                })
                .await?;
                info!("Batch learning produced {} learnings", created);
                self.context.invalidate();
            }
            SteeringCommand::ApproveCodeChange(id) => self.record_review(&id, true).await?,
            SteeringCommand::RejectCodeChange(id) => self.record_review(&id, false).await?,
            SteeringCommand::AddGoal(goal) => {
                self.state.add_goal(goal).await?;
            }
            SteeringCommand::RemoveGoal(goal) => {
                if !self.state.remove_goal(&goal).await? {
                    warn!("Goal not found: {}", goal);
                }
            }
            SteeringCommand::QueryState => {
                let state = self.state.republish().await?;
                info!(
                    "Agent {}: status={}, iteration={}, goal={:?}, {} thoughts, {} actions in view",
                    state.id,
                    state.status,
                    state.iteration,
                    state.current_goal,
                    state.recent_thoughts.len(),
                    state.recent_actions.len()
                );
            }
            SteeringCommand::ResetMemory => {
                self.state.reset_views().await?;
                self.history.clear();
                self.context.invalidate();
            }
            SteeringCommand::ChatWithAgent(message) => {
                self.chat_inbox.push(message);
            }
        }
        Ok(())
    }

    async fn record_review(&mut self, change_id: &str, approved: bool) -> Result<()> {
        let (verdict, importance) = if approved {
            ("approved", 0.7)
        } else {
            ("rejected", 0.6)
        };
        let entry = MemoryEntry::new(
            MemoryType::Decision,
            format!("Operator {} code change {}", verdict, change_id),
            format!("Code change {} {}", change_id, verdict),
            importance,
        )
        .with_tag(CODE_REVIEW_TAG)
        .with_source(change_id);

        self.append_memory(&entry)
            .await
            .with_context(|| format!("Failed to record review of {}", change_id))?;
        self.context.invalidate();
        Ok(())
    }

    async fn handle_failure(&mut self, err: &anyhow::Error) {
        error!(iteration = self.iteration, "Iteration failed: {:#}", err);

        self.fail_unfinished_actions().await;
        if let Err(e) = self.state.set_status(AgentStatus::Error).await {
            warn!("Failed to set error status: {}", e);
        }

        let entry = MemoryEntry::new(
            MemoryType::Error,
            format!("{:#}", err),
            summarize(
                &format!("Iteration {} failed: {}", self.iteration, err),
                SUMMARY_CHARS,
            ),
            0.6,
        )
        .with_tag(ITERATION_ERROR_TAG);
        if let Err(e) = self.append_memory(&entry).await {
            warn!("Failed to record iteration error in memory: {}", e);
        }
    }

    /// Actions still pending or running belong to the failed iteration
    async fn fail_unfinished_actions(&self) {
        let unfinished: Vec<String> = self
            .state
            .snapshot()
            .await
            .recent_actions
            .into_iter()
            .filter(|a| matches!(a.status, ActionStatus::Pending | ActionStatus::Running))
            .map(|a| a.id)
            .collect();

        for id in unfinished {
            let output = format!("ERROR: iteration {} failed before completion", self.iteration);
            if let Err(e) = self
                .state
                .update_action(&id, ActionStatus::Failed, Some(output))
                .await
            {
                warn!("Failed to close action {}: {}", id, e);
            }
        }
    }

    async fn append_memory(&self, entry: &MemoryEntry) -> sdk::errors::Result<()> {
        let store = Arc::clone(&self.long_term);
        retry(&self.retry, "append memory", || {
            let store = Arc::clone(&store);
            async move { store.append(entry).await }
        })
        .await
    }
}
