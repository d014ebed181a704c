//! Command handlers for CLI operations
//!
//! Every handler except `start` works against the shared database only, so it
//! is safe to run while the agent is up:
//! - status, watch: read the mirrored agent state
//! - steer: enqueue a steering command
//! - memory, context, usage: inspect long-term memory and the budget
//! - consolidate: run one consolidation pass in this process

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, AdmissionLimits};
use crate::cli::SteerAction;
use crate::config::Config;
use crate::daemon::DaemonManager;
use crate::db::Database;
use crate::llm::{LLMProvider, OllamaProvider};
use crate::memory::{
    ConsolidationService, ConsolidationSettings, ContextSettings, LongTermStore,
    MemoryContextBuilder, RetryPolicy, ShortTermStore, SqliteMemoryStore,
};
use crate::reader::{ReaderUpdate, StateReader};
use sdk::commands::SteeringCommand;
use sdk::types::{Action, AgentState, Thought};

/// How long `status` waits for the LLM endpoint
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

const SUMMARY_CHARS: usize = 160;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open agent database")
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn handle_stop(config: &Config, format: OutputFormat) -> Result<()> {
    let status = DaemonManager::status(config)?;
    if !status.is_running {
        match format {
            OutputFormat::Text => println!("Kestrel is not running."),
            OutputFormat::Json => print_json(&json!({ "stopped": false, "running": false }))?,
        }
        return Ok(());
    }

    DaemonManager::stop(config).await?;
    match format {
        OutputFormat::Text => println!("Kestrel stopped."),
        OutputFormat::Json => print_json(&json!({ "stopped": true, "pid": status.pid }))?,
    }
    Ok(())
}

/// Process, agent and budget status in one view
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::status(config)?;
    let database = open_database(config).await?;

    let store: Arc<dyn ShortTermStore> = Arc::new(database.memory_store());
    let mut reader = StateReader::new(store, &config.reader);
    reader
        .poll_once()
        .await
        .context("Failed to read agent state")?;
    let state = reader.get_current_state().cloned();

    let admission = AdmissionController::new(
        database.pool().clone(),
        AdmissionLimits::from(&config.budget),
    );
    let decision = admission
        .can_proceed()
        .await
        .context("Failed to read usage")?;
    let pending = database
        .steering_queue()
        .pending()
        .await
        .context("Failed to read steering queue")?;

    let llm_reachable = match OllamaProvider::from_config(&config.llm, HEALTH_CHECK_TIMEOUT) {
        Ok(provider) => provider.check_health().await,
        Err(_) => false,
    };

    match format {
        OutputFormat::Text => {
            match daemon.pid {
                Some(pid) => println!("Kestrel is running (PID {})", pid),
                None => println!("Kestrel is not running."),
            }
            match &state {
                Some(state) => print_state(state),
                None => println!("No agent state published yet."),
            }
            println!(
                "Budget today: {}/{} loops, {}/{} tokens{}",
                decision.usage.loop_count,
                admission.limits().max_loops_per_day,
                decision.usage.estimated_tokens,
                admission.limits().max_tokens_per_day,
                decision
                    .reason
                    .as_deref()
                    .map(|r| format!(" (throttled: {})", r))
                    .unwrap_or_default()
            );
            println!("Pending steering commands: {}", pending);
            println!(
                "LLM {} ({}): {}",
                config.llm.model,
                config.llm.base_url,
                if llm_reachable {
                    "reachable"
                } else {
                    "unreachable"
                }
            );
        }
        OutputFormat::Json => print_json(&json!({
            "running": daemon.is_running,
            "pid": daemon.pid,
            "pid_file": daemon.pid_file,
            "state": state,
            "budget": {
                "allowed": decision.allowed,
                "reason": decision.reason,
                "usage": decision.usage,
                "max_loops_per_day": admission.limits().max_loops_per_day,
                "max_tokens_per_day": admission.limits().max_tokens_per_day,
            },
            "pending_commands": pending,
            "llm": {
                "base_url": config.llm.base_url,
                "model": config.llm.model,
                "reachable": llm_reachable,
            },
        }))?,
    }

    database.close().await?;
    Ok(())
}

fn print_state(state: &AgentState) {
    println!("Agent {}", state.id);
    println!("  Status:    {}", state.status);
    println!("  Iteration: {}", state.iteration);
    println!(
        "  Goal:      {}",
        state.current_goal.as_deref().unwrap_or("(none)")
    );
    if state.goals.len() > 1 {
        println!("  Queued:    {}", state.goals[1..].join("; "));
    }
    println!(
        "  Updated:   {}",
        state.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(thought) = state.recent_thoughts.last() {
        println!("  Last thought: {}", thought.content.summary(SUMMARY_CHARS));
    }
}

pub fn format_thought(thought: &Thought) -> String {
    format!(
        "[{}] thought/{}: {}",
        thought.timestamp.format("%H:%M:%S"),
        thought.thought_type.as_str(),
        thought.content.summary(SUMMARY_CHARS)
    )
}

pub fn format_action(action: &Action) -> String {
    let mut line = format!(
        "[{}] action/{} {} {}",
        action.timestamp.format("%H:%M:%S"),
        action.status,
        action.name,
        action.input
    );
    if let Some(output) = &action.output {
        line.push_str(" -> ");
        line.push_str(&sdk::types::summarize(output, SUMMARY_CHARS));
    }
    line
}

fn print_update(update: &ReaderUpdate, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if let Some(state) = &update.state {
                println!(
                    "-- iteration {} | {} | goal: {}",
                    state.iteration,
                    state.status,
                    state.current_goal.as_deref().unwrap_or("(none)")
                );
            }
            for thought in &update.new_thoughts {
                println!("{}", format_thought(thought));
            }
            for action in &update.new_actions {
                println!("{}", format_action(action));
            }
        }
        OutputFormat::Json => {
            // One JSON document per line so the stream can be piped
            for thought in &update.new_thoughts {
                println!("{}", json!({ "thought": thought }));
            }
            for action in &update.new_actions {
                println!("{}", json!({ "action": action }));
            }
            if let Some(state) = &update.state {
                println!(
                    "{}",
                    json!({ "status": state.status, "iteration": state.iteration })
                );
            }
        }
    }
    Ok(())
}

/// Stream thoughts and actions until Ctrl-C
pub async fn handle_watch(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store: Arc<dyn ShortTermStore> = Arc::new(database.memory_store());
    let reader = StateReader::new(store, &config.reader);

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<ReaderUpdate>(16);
    let task = tokio::spawn(reader.run(cancel.clone(), tx));

    if format == OutputFormat::Text {
        println!("Watching agent activity (Ctrl-C to stop)");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = rx.recv() => match update {
                Some(update) => print_update(&update, format)?,
                None => break,
            },
        }
    }

    cancel.cancel();
    task.await.context("Reader task failed")?;
    database.close().await?;
    Ok(())
}

pub async fn handle_steer(action: SteerAction, config: &Config, format: OutputFormat) -> Result<()> {
    let command = SteeringCommand::from(action);
    let database = open_database(config).await?;
    let queue = database.steering_queue();

    let id = queue
        .enqueue(&command)
        .await
        .with_context(|| format!("Failed to enqueue {}", command.name()))?;
    let running = DaemonManager::status(config)?.is_running;

    match format {
        OutputFormat::Text => {
            println!("Queued {} (#{})", command.name(), id);
            if !running {
                println!("Kestrel is not running; the command applies when it starts.");
            }
        }
        OutputFormat::Json => print_json(&json!({
            "id": id,
            "command": command,
            "agent_running": running,
        }))?,
    }

    database.close().await?;
    Ok(())
}

pub async fn handle_memory(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store = database.memory_store();

    let entries = store
        .recent_entries(limit)
        .await
        .context("Failed to read long-term memory")?;
    let total = store.count().await.context("Failed to count memories")?;

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("Long-term memory is empty");
            } else {
                println!("Long-term memory ({} of {} entries):", entries.len(), total);
                println!();
                for entry in &entries {
                    println!(
                        "{} [{}] importance {:.2}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.memory_type.as_str(),
                        entry.importance
                    );
                    println!("  {}", entry.summary);
                    if !entry.tags.is_empty() {
                        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
                        println!("  tags: {}", tags.join(", "));
                    }
                    println!("  id: {}", entry.id);
                    println!();
                }
            }
        }
        OutputFormat::Json => print_json(&json!({
            "entries": entries,
            "count": entries.len(),
            "total": total,
            "limit": limit,
        }))?,
    }

    database.close().await?;
    Ok(())
}

/// Render the memory context the agent would load right now
pub async fn handle_context(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store: Arc<dyn LongTermStore> = Arc::new(database.memory_store());

    let builder = MemoryContextBuilder::new(
        store,
        ContextSettings::from(&config.memory),
        RetryPolicy::from(&config.retry),
    );
    let (active, rendered) = builder
        .preview(Utc::now())
        .await
        .context("Failed to build memory context")?;

    match format {
        OutputFormat::Text => println!("{}", rendered),
        OutputFormat::Json => {
            let ranked: Vec<_> = active
                .iter()
                .map(|m| json!({ "id": m.entry.id, "type": m.entry.memory_type, "score": m.score }))
                .collect();
            print_json(&json!({ "context": rendered, "active": ranked }))?
        }
    }

    database.close().await?;
    Ok(())
}

pub async fn handle_usage(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let admission = AdmissionController::new(
        database.pool().clone(),
        AdmissionLimits::from(&config.budget),
    );
    let history = admission.usage_history().await?;
    let limits = admission.limits();

    match format {
        OutputFormat::Text => {
            println!(
                "Daily limits: {} loops, {} tokens",
                limits.max_loops_per_day, limits.max_tokens_per_day
            );
            if history.is_empty() {
                println!("No usage recorded");
            }
            for record in &history {
                println!(
                    "  {}  {:>6} loops  {:>10} tokens",
                    record.date, record.loop_count, record.estimated_tokens
                );
            }
        }
        OutputFormat::Json => print_json(&json!({
            "max_loops_per_day": limits.max_loops_per_day,
            "max_tokens_per_day": limits.max_tokens_per_day,
            "history": history,
        }))?,
    }

    database.close().await?;
    Ok(())
}

/// One consolidation pass against the shared database
pub async fn handle_consolidate(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let store: Arc<SqliteMemoryStore> = Arc::new(database.memory_store());

    let service = ConsolidationService::new(
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        Arc::clone(&store) as Arc<dyn LongTermStore>,
        ConsolidationSettings::from(&config.consolidation),
        RetryPolicy::from(&config.retry),
    );
    let report = service
        .run_once()
        .await
        .context("Consolidation pass failed")?;
    let total = store.count().await?;

    match format {
        OutputFormat::Text => {
            println!(
                "Scanned {} records, promoted {}, skipped {}, derived {} learnings",
                report.scanned, report.promoted, report.skipped, report.learnings
            );
            println!("Long-term memory now holds {} entries", total);
        }
        OutputFormat::Json => print_json(&json!({ "report": report, "long_term_count": total }))?,
    }

    database.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{ActionStatus, ThoughtContent, ThoughtType};

    #[test]
    fn test_format_thought() {
        let thought = Thought::new(
            ThoughtType::Planning,
            ThoughtContent::PlainText {
                text: "split the work".into(),
            },
        );
        let line = format_thought(&thought);
        assert!(line.contains("thought/planning"));
        assert!(line.ends_with("split the work"));
    }

    #[test]
    fn test_format_action_with_output() {
        let mut action = Action::pending("read_file", r#"{"path":"a.txt"}"#);
        action.status = ActionStatus::Completed;
        action.output = Some("hello".into());

        let line = format_action(&action);
        assert!(line.contains("read_file"));
        assert!(line.ends_with("-> hello"));
    }

    #[test]
    fn test_output_format_flag() {
        assert_eq!(OutputFormat::from_flag(true), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flag(false), OutputFormat::Text);
    }
}
