//! CLI interface for Kestrel
//!
//! The same binary runs the agent (`start`) and every operator command. Commands
//! other than `start` and `consolidate` never touch the agent directly: they
//! read the shared database or enqueue steering commands for it.

use clap::{Parser, Subcommand};
use sdk::commands::SteeringCommand;
use std::path::PathBuf;

/// Kestrel autonomous agent
///
/// Runs a continuous think-act loop against a local LLM, with tiered memory
/// and a daily budget.
#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent in the foreground until SIGTERM or Ctrl-C
    Start,

    /// Stop the running agent
    Stop,

    /// Show agent status, budget usage and pending steering commands
    Status,

    /// Stream new thoughts and actions as the agent produces them
    Watch,

    /// Send a steering command to the running agent
    Steer {
        #[command(subcommand)]
        action: SteerAction,
    },

    /// Show recent long-term memories
    Memory {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Render the memory context the agent would see now
    Context,

    /// Show loop and token usage for the last 7 days
    Usage,

    /// Run one consolidation pass without the agent
    Consolidate,
}

/// Steering commands, one per agent command
#[derive(Subcommand, Debug)]
pub enum SteerAction {
    /// Pause the agent loop
    Pause,

    /// Resume a paused agent
    Resume,

    /// Replace the standing prompt
    Prompt {
        /// New prompt text
        text: String,
    },

    /// Append a goal
    GoalAdd {
        /// Goal text
        goal: String,
    },

    /// Remove a goal by exact text
    GoalRemove {
        /// Goal text
        goal: String,
    },

    /// Run a consolidation pass now
    Consolidate,

    /// Derive learnings from recent long-term memories
    Learn,

    /// Approve a proposed code change
    Approve {
        /// Change identifier
        id: String,
    },

    /// Reject a proposed code change
    Reject {
        /// Change identifier
        id: String,
    },

    /// Ask the agent to republish and log its state
    Query,

    /// Clear the recent thought and action views
    ResetMemory,

    /// Send a message included in the next prompt
    Chat {
        /// Message text
        message: String,
    },
}

impl From<SteerAction> for SteeringCommand {
    fn from(action: SteerAction) -> Self {
        match action {
            SteerAction::Pause => SteeringCommand::PauseAgent,
            SteerAction::Resume => SteeringCommand::ResumeAgent,
            SteerAction::Prompt { text } => SteeringCommand::UpdatePrompt(text),
            SteerAction::GoalAdd { goal } => SteeringCommand::AddGoal(goal),
            SteerAction::GoalRemove { goal } => SteeringCommand::RemoveGoal(goal),
            SteerAction::Consolidate => SteeringCommand::TriggerMemoryConsolidation,
            SteerAction::Learn => SteeringCommand::TriggerBatchLearning,
            SteerAction::Approve { id } => SteeringCommand::ApproveCodeChange(id),
            SteerAction::Reject { id } => SteeringCommand::RejectCodeChange(id),
            SteerAction::Query => SteeringCommand::QueryState,
            SteerAction::ResetMemory => SteeringCommand::ResetMemory,
            SteerAction::Chat { message } => SteeringCommand::ChatWithAgent(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["kestrel", "status"]);
        assert!(matches!(cli.command, Command::Status));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "kestrel", "--json", "--log", "debug", "--config", "/tmp/k.toml", "usage",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/k.toml")));
        assert!(matches!(cli.command, Command::Usage));
    }

    #[test]
    fn test_memory_limit() {
        let cli = Cli::parse_from(["kestrel", "memory", "--limit", "5"]);
        if let Command::Memory { limit } = cli.command {
            assert_eq!(limit, 5);
        } else {
            panic!("Expected Memory command");
        }

        let cli = Cli::parse_from(["kestrel", "memory"]);
        assert!(matches!(cli.command, Command::Memory { limit: 20 }));
    }

    #[test]
    fn test_steer_goal_add() {
        let cli = Cli::parse_from(["kestrel", "steer", "goal-add", "write the changelog"]);
        let Command::Steer { action } = cli.command else {
            panic!("Expected Steer command");
        };
        assert_eq!(
            SteeringCommand::from(action),
            SteeringCommand::AddGoal("write the changelog".into())
        );
    }

    #[test]
    fn test_steer_mapping() {
        let cases = [
            (vec!["pause"], SteeringCommand::PauseAgent),
            (vec!["resume"], SteeringCommand::ResumeAgent),
            (vec!["learn"], SteeringCommand::TriggerBatchLearning),
            (vec!["consolidate"], SteeringCommand::TriggerMemoryConsolidation),
            (vec!["reset-memory"], SteeringCommand::ResetMemory),
            (vec!["approve", "c-1"], SteeringCommand::ApproveCodeChange("c-1".into())),
            (vec!["chat", "hi"], SteeringCommand::ChatWithAgent("hi".into())),
        ];

        for (args, expected) in cases {
            let mut argv = vec!["kestrel", "steer"];
            argv.extend(args);
            let Command::Steer { action } = Cli::parse_from(argv).command else {
                panic!("Expected Steer command");
            };
            assert_eq!(SteeringCommand::from(action), expected);
        }
    }
}
