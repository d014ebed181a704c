//! Daemon lifecycle management
//!
//! [`DaemonManager`] owns the PID file (`<data_dir>/kestrel.pid`) and the
//! process-wide [`CancellationToken`]. [`run_agent`] wires the scheduler and
//! the consolidation service onto that token and runs them until SIGTERM or
//! Ctrl-C.
//!
//! Only one agent may run per data directory:
//! 1. An existing PID file is read
//! 2. If that process is alive, start fails with `DaemonAlreadyRunning`
//! 3. A PID file naming a dead process is stale and removed
//!
//! Shutdown cancels the token, waits up to 30 seconds for both tasks,
//! checkpoints the WAL and removes the PID file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, AdmissionLimits};
use crate::agent::{AgentServices, Scheduler, SchedulerSettings};
use crate::config::Config;
use crate::db::Database;
use crate::llm::{LLMProvider, OllamaProvider};
use crate::memory::{
    get_json, ConsolidationService, ConsolidationSettings, ContextSettings, MemoryContextBuilder,
    LongTermStore, RetryPolicy, ShortTermStore,
};
use crate::state::{StateManager, StateSettings};
use crate::tools::{ToolRegistry, Workspace};
use sdk::errors::EngineError;
use sdk::keys::CURRENT_STATE_KEY;
use sdk::types::{AgentState, AgentStatus};

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, EngineError>;

pub const PID_FILE_NAME: &str = "kestrel.pid";

/// How long shutdown waits for the scheduler and consolidation tasks
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How long `stop` waits for the process to exit
const STOP_WAIT: Duration = Duration::from_secs(35);

#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

pub struct DaemonManager {
    pid_file: PathBuf,
    cancel: CancellationToken,
    /// Set once this process wrote the PID file
    owns_pid_file: AtomicBool,
}

impl DaemonManager {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            pid_file: Self::get_pid_file_path(config),
            cancel: CancellationToken::new(),
            owns_pid_file: AtomicBool::new(false),
        })
    }

    /// Claim the data directory for this process
    pub fn acquire(&self) -> Result<()> {
        if self.is_daemon_running()? {
            return Err(EngineError::DaemonAlreadyRunning);
        }
        self.write_pid_file()
    }

    /// Ask a running agent to stop and wait for it to exit
    pub async fn stop(config: &Config) -> Result<()> {
        let pid_file = Self::get_pid_file_path(config);
        let pid = Self::read_pid_file(&pid_file)?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            tracing::info!("Sending SIGTERM to agent process {}", pid);
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
                EngineError::Io(std::io::Error::other(format!(
                    "Failed to send SIGTERM: {}",
                    e
                )))
            })?;

            tracing::info!("Waiting for agent to shut down gracefully");
            let wait_result = timeout(STOP_WAIT, async {
                while Self::is_process_running(pid) {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await;

            if wait_result.is_err() {
                tracing::warn!("Agent did not stop within {:?}", STOP_WAIT);
            } else {
                tracing::info!("Agent stopped");
            }

            if pid_file.exists() && !Self::is_process_running(pid) {
                fs::remove_file(&pid_file)?;
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            Err(EngineError::Config(
                "Stopping the agent is only supported on Unix".to_string(),
            ))
        }
    }

    pub fn status(config: &Config) -> Result<DaemonStatus> {
        let pid_file = Self::get_pid_file_path(config);

        let pid = Self::read_pid_file(&pid_file)
            .ok()
            .filter(|pid| Self::is_process_running(*pid));

        Ok(DaemonStatus {
            is_running: pid.is_some(),
            pid,
            pid_file,
        })
    }

    /// Token shared by every long-running task of this process
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn signal_shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown_signaled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file
    }

    /// Cancel the token on SIGTERM or Ctrl-C
    pub fn spawn_signal_handler(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            cancel.cancel();
        })
    }

    /// Remove the PID file if this process wrote it
    pub fn release(&self) {
        if self.owns_pid_file.swap(false, Ordering::SeqCst) && self.pid_file.exists() {
            match fs::remove_file(&self.pid_file) {
                Ok(_) => tracing::info!("PID file removed"),
                Err(e) => tracing::error!("Failed to remove PID file: {}", e),
            }
        }
    }

    fn is_daemon_running(&self) -> Result<bool> {
        if !self.pid_file.exists() {
            return Ok(false);
        }

        match Self::read_pid_file(&self.pid_file) {
            Ok(pid) if Self::is_process_running(pid) => Ok(true),
            _ => {
                tracing::warn!("Removing stale PID file {:?}", self.pid_file);
                fs::remove_file(&self.pid_file)?;
                Ok(false)
            }
        }
    }

    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();

        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.pid_file, pid.to_string())?;
        self.owns_pid_file.store(true, Ordering::SeqCst);

        tracing::info!("Wrote PID {} to {:?}", pid, self.pid_file);
        Ok(())
    }

    fn read_pid_file(pid_file: &Path) -> Result<u32> {
        let content = fs::read_to_string(pid_file)?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| EngineError::Config(format!("Invalid PID in file: {}", e)))
    }

    fn is_process_running(pid: u32) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            // Signal 0 only checks for existence
            kill(Pid::from_raw(pid as i32), None).is_ok()
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }

    fn get_pid_file_path(config: &Config) -> PathBuf {
        config.core.data_dir.join(PID_FILE_NAME)
    }
}

impl Drop for DaemonManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C"),
            }
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable ({}); listening for Ctrl-C only", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl-C");
    }
}

/// State to start from: the mirrored snapshot if one is still live, else a
/// fresh state from configuration
pub async fn initial_state(store: &dyn ShortTermStore, config: &Config) -> AgentState {
    match get_json::<AgentState>(store, CURRENT_STATE_KEY).await {
        Ok(Some(mut state)) => {
            tracing::info!(
                "Resuming agent {} at iteration {}",
                state.id,
                state.iteration
            );
            // Pause survives a restart; transient statuses do not
            if state.status != AgentStatus::Paused {
                state.status = AgentStatus::Idle;
            }
            state
        }
        Ok(None) => fresh_state(config),
        Err(e) => {
            tracing::warn!("Ignoring unreadable state snapshot: {}", e);
            fresh_state(config)
        }
    }
}

fn fresh_state(config: &Config) -> AgentState {
    let mut state = AgentState::new(config.agent.initial_prompt.clone());
    if let Some(goal) = &config.agent.initial_goal {
        state.goals.push(goal.clone());
        state.sync_current_goal();
    }
    state
}

/// Run the agent in the foreground until a shutdown signal
pub async fn run_agent(config: &Config) -> anyhow::Result<()> {
    use anyhow::Context;

    let manager = DaemonManager::new(config)?;
    manager.acquire()?;
    let _signals = manager.spawn_signal_handler();
    let cancel = manager.cancellation_token();

    let db = Database::new(&config.database_path())
        .await
        .context("Failed to open agent database")?;
    let store = Arc::new(db.memory_store());
    let retry = RetryPolicy::from(&config.retry);

    let state = Arc::new(StateManager::new(
        initial_state(store.as_ref(), config).await,
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        StateSettings::from(&config.memory),
        retry.clone(),
    ));
    state
        .republish()
        .await
        .context("Failed to publish initial state")?;

    let consolidation = Arc::new(ConsolidationService::new(
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        Arc::clone(&store) as Arc<dyn LongTermStore>,
        ConsolidationSettings::from(&config.consolidation),
        retry.clone(),
    ));

    let llm = Arc::new(
        OllamaProvider::from_config(&config.llm, config.agent.llm_timeout())
            .context("Failed to create LLM provider")?,
    );
    if !llm.check_health().await {
        tracing::warn!(
            "LLM endpoint {} is not reachable; iterations will fail until it is",
            config.llm.base_url
        );
    }

    tokio::fs::create_dir_all(&config.core.workspace)
        .await
        .context("Failed to create workspace")?;
    let workspace = Arc::new(
        Workspace::new(&config.core.workspace).context("Failed to open workspace")?,
    );

    let scheduler = Scheduler::new(
        AgentServices {
            state,
            admission: Arc::new(AdmissionController::new(
                db.pool().clone(),
                AdmissionLimits::from(&config.budget),
            )),
            context: MemoryContextBuilder::new(
                Arc::clone(&store) as Arc<dyn LongTermStore>,
                ContextSettings::from(&config.memory),
                retry.clone(),
            ),
            consolidation: Arc::clone(&consolidation),
            long_term: store as Arc<dyn LongTermStore>,
            llm: llm as Arc<dyn LLMProvider>,
            tools: ToolRegistry::with_filesystem(workspace),
            steering: db.steering_queue(),
            retry,
        },
        SchedulerSettings::from(config),
    );

    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));
    let consolidation_task = tokio::spawn(consolidation.run(cancel.clone()));
    tracing::info!("Kestrel agent running (pid {})", std::process::id());

    cancel.cancelled().await;
    tracing::info!("Starting graceful shutdown");

    let drained = timeout(SHUTDOWN_GRACE, async {
        let (scheduler, consolidation) = tokio::join!(scheduler_task, consolidation_task);
        if let Err(e) = scheduler {
            tracing::error!("Scheduler task ended abnormally: {}", e);
        }
        if let Err(e) = consolidation {
            tracing::error!("Consolidation task ended abnormally: {}", e);
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            "Tasks did not stop within {:?}; proceeding with shutdown",
            SHUTDOWN_GRACE
        );
    }

    match db.flush_wal().await {
        Ok(_) => tracing::info!("SQLite WAL flushed"),
        Err(e) => tracing::error!("Failed to flush SQLite WAL: {}", e),
    }
    if let Err(e) = db.close().await {
        tracing::warn!("Failed to close database: {}", e);
    }
    manager.release();

    tracing::info!("Graceful shutdown completed");
    Ok(())
}
