//! Agent state ownership
//!
//! [`StateManager`] holds the one authoritative [`AgentState`]. Every mutation
//! is applied to a copy, mirrored into short-term memory (record key first,
//! then `agent:current-state`), and only committed in process once the
//! mirror succeeded. Listeners then receive a [`StateChange`] on a bounded
//! broadcast channel; slow listeners lose the oldest changes.

use chrono::Utc;
use sdk::errors::{EngineError, Result};
use sdk::keys::{action_key, thought_key, CURRENT_STATE_KEY};
use sdk::types::{Action, ActionStatus, AgentState, AgentStatus, Thought};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::config::MemoryConfig;
use crate::memory::retry::{retry, RetryPolicy};
use crate::memory::ShortTermStore;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// TTLs for mirrored records
#[derive(Debug, Clone)]
pub struct StateSettings {
    pub state_ttl: Duration,
    pub record_ttl: Duration,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for StateSettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            state_ttl: Duration::from_secs(config.state_ttl_hours * 3600),
            record_ttl: Duration::from_secs(config.record_ttl_hours * 3600),
        }
    }
}

/// Notification raised after a committed mutation
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Status(AgentStatus),
    Goal(Option<String>),
    Prompt(String),
    Iteration(u64),
    ThoughtAdded(Thought),
    ActionAdded(Action),
    ActionUpdated(Action),
    ViewsReset,
    Republished,
}

/// A record to mirror alongside the state snapshot
struct Record {
    key: String,
    value: String,
}

pub struct StateManager {
    state: Mutex<AgentState>,
    store: Arc<dyn ShortTermStore>,
    settings: StateSettings,
    retry: RetryPolicy,
    changes: broadcast::Sender<StateChange>,
}

impl StateManager {
    pub fn new(
        initial: AgentState,
        store: Arc<dyn ShortTermStore>,
        settings: StateSettings,
        retry: RetryPolicy,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(initial),
            store,
            settings,
            retry,
            changes,
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub async fn set_status(&self, status: AgentStatus) -> Result<()> {
        self.mutate(None, |state| {
            state.status = status;
            Ok(StateChange::Status(status))
        })
        .await
    }

    /// Make `goal` current (front of the goal list); `None` clears all goals
    pub async fn set_goal(&self, goal: Option<String>) -> Result<()> {
        self.mutate(None, move |state| {
            match goal {
                Some(goal) => {
                    state.goals.retain(|g| *g != goal);
                    state.goals.insert(0, goal);
                }
                None => state.goals.clear(),
            }
            state.sync_current_goal();
            Ok(StateChange::Goal(state.current_goal.clone()))
        })
        .await
    }

    /// Append a goal unless already present
    pub async fn add_goal(&self, goal: String) -> Result<()> {
        self.mutate(None, move |state| {
            if !state.goals.contains(&goal) {
                state.goals.push(goal);
            }
            state.sync_current_goal();
            Ok(StateChange::Goal(state.current_goal.clone()))
        })
        .await
    }

    /// Remove a goal; returns whether it was present
    pub async fn remove_goal(&self, goal: &str) -> Result<bool> {
        let mut removed = false;
        self.mutate(None, |state| {
            let before = state.goals.len();
            state.goals.retain(|g| g != goal);
            removed = state.goals.len() != before;
            state.sync_current_goal();
            Ok(StateChange::Goal(state.current_goal.clone()))
        })
        .await?;
        Ok(removed)
    }

    pub async fn set_prompt(&self, prompt: String) -> Result<()> {
        self.mutate(None, move |state| {
            state.current_prompt = prompt.clone();
            Ok(StateChange::Prompt(prompt))
        })
        .await
    }

    pub async fn set_iteration(&self, iteration: u64) -> Result<()> {
        self.mutate(None, move |state| {
            state.iteration = iteration;
            Ok(StateChange::Iteration(iteration))
        })
        .await
    }

    /// Record a thought under `thought:<id>` and in the bounded view
    pub async fn add_thought(&self, thought: Thought) -> Result<()> {
        let record = Record {
            key: thought_key(&thought.id),
            value: serde_json::to_string(&thought)?,
        };
        self.mutate(Some(record), move |state| {
            state.push_thought(thought.clone());
            Ok(StateChange::ThoughtAdded(thought))
        })
        .await
    }

    /// Record an action under `action:<id>` and in the bounded view
    pub async fn add_action(&self, action: Action) -> Result<()> {
        let record = Record {
            key: action_key(&action.id),
            value: serde_json::to_string(&action)?,
        };
        self.mutate(Some(record), move |state| {
            state.push_action(action.clone());
            Ok(StateChange::ActionAdded(action))
        })
        .await
    }

    /// Move an action to `status`, optionally setting its output
    ///
    /// The action must be in the bounded view. A terminal action may move to
    /// another terminal status but never back to `Pending` or `Running`.
    pub async fn update_action(
        &self,
        id: &str,
        status: ActionStatus,
        output: Option<String>,
    ) -> Result<Action> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();

        let action = next
            .action_mut(id)
            .ok_or_else(|| EngineError::UnknownAction(id.to_string()))?;
        if !action.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id: id.to_string(),
                from: action.status.to_string(),
                to: status.to_string(),
            });
        }
        action.status = status;
        action.updated_at = Some(Utc::now());
        if output.is_some() {
            action.output = output;
        }
        let updated = action.clone();

        let record = Record {
            key: action_key(&updated.id),
            value: serde_json::to_string(&updated)?,
        };
        self.commit(&mut guard, next, Some(record)).await?;
        drop(guard);

        debug!("Action {} -> {}", updated.id, updated.status);
        let _ = self.changes.send(StateChange::ActionUpdated(updated.clone()));
        Ok(updated)
    }

    /// Empty the bounded views; records stay in short-term memory
    pub async fn reset_views(&self) -> Result<()> {
        self.mutate(None, |state| {
            state.recent_thoughts.clear();
            state.recent_actions.clear();
            Ok(StateChange::ViewsReset)
        })
        .await
    }

    /// Re-mirror the current state without changing it
    pub async fn republish(&self) -> Result<AgentState> {
        let mut guard = self.state.lock().await;
        let next = guard.clone();
        self.commit(&mut guard, next, None).await?;
        let snapshot = guard.clone();
        drop(guard);

        info!(
            "State republished: status={}, iteration={}, goal={:?}",
            snapshot.status, snapshot.iteration, snapshot.current_goal
        );
        let _ = self.changes.send(StateChange::Republished);
        Ok(snapshot)
    }

    /// Apply `apply` to a copy, commit it, then notify with the change it returns
    async fn mutate<F>(&self, record: Option<Record>, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AgentState) -> Result<StateChange>,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let change = apply(&mut next)?;
        self.commit(&mut guard, next, record).await?;
        drop(guard);

        let _ = self.changes.send(change);
        Ok(())
    }

    /// Mirror `next` (and `record`), then make it the in-process state
    async fn commit(
        &self,
        current: &mut AgentState,
        mut next: AgentState,
        record: Option<Record>,
    ) -> Result<()> {
        next.last_updated = Utc::now();

        if let Some(record) = &record {
            let store = Arc::clone(&self.store);
            let ttl = self.settings.record_ttl;
            retry(&self.retry, "mirror record", || {
                let store = Arc::clone(&store);
                async move { store.set(&record.key, &record.value, ttl).await }
            })
            .await?;
        }

        let snapshot = serde_json::to_string(&next)?;
        let store = Arc::clone(&self.store);
        let ttl = self.settings.state_ttl;
        retry(&self.retry, "mirror state", || {
            let store = Arc::clone(&store);
            let snapshot = &snapshot;
            async move { store.set(CURRENT_STATE_KEY, snapshot, ttl).await }
        })
        .await?;

        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{get_json, InMemoryStore};

    fn manager() -> (Arc<InMemoryStore>, StateManager) {
        let store = Arc::new(InMemoryStore::new());
        let manager = StateManager::new(
            AgentState::new("prompt"),
            store.clone(),
            StateSettings::default(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        );
        (store, manager)
    }

    #[tokio::test]
    async fn test_status_is_mirrored() {
        let (store, manager) = manager();
        manager.set_status(AgentStatus::Thinking).await.unwrap();

        let mirrored: AgentState = get_json(store.as_ref(), CURRENT_STATE_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mirrored.status, AgentStatus::Thinking);
    }

    #[tokio::test]
    async fn test_failed_mirror_leaves_state_untouched() {
        let (store, manager) = manager();
        store.fail_next(3);

        let result = manager.set_status(AgentStatus::Acting).await;
        assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
        assert_eq!(manager.snapshot().await.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_goals() {
        let (_store, manager) = manager();
        manager.add_goal("a".into()).await.unwrap();
        manager.add_goal("b".into()).await.unwrap();
        manager.add_goal("a".into()).await.unwrap();
        assert_eq!(manager.snapshot().await.goals, vec!["a", "b"]);
        assert_eq!(manager.snapshot().await.current_goal.as_deref(), Some("a"));

        assert!(manager.remove_goal("a").await.unwrap());
        assert!(!manager.remove_goal("zzz").await.unwrap());
        assert_eq!(manager.snapshot().await.current_goal.as_deref(), Some("b"));

        manager.set_goal(Some("c".into())).await.unwrap();
        assert_eq!(manager.snapshot().await.goals, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_notifications() {
        let (_store, manager) = manager();
        let mut rx = manager.subscribe();

        manager.set_prompt("new prompt".into()).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StateChange::Prompt("new prompt".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let (_store, manager) = manager();
        let result = manager
            .update_action("missing", ActionStatus::Running, None)
            .await;
        assert!(matches!(result, Err(EngineError::UnknownAction(_))));
    }
}
