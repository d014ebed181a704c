//! State reader
//!
//! Runs outside the agent process and polls short-term memory for the state
//! snapshot and any thought/action records it has not reported yet. The
//! relationship is read-only and eventually consistent: keys may be missing
//! or stale, and the same record is seen on many polls, so entities are
//! deduplicated through a bounded seen set.

use chrono::{DateTime, Utc};
use sdk::errors::Result;
use sdk::keys::{ACTION_PATTERN, CURRENT_STATE_KEY, THOUGHT_PATTERN};
use sdk::types::{Action, AgentState, Thought};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ReaderConfig;
use crate::memory::{get_json, ShortTermStore};

/// Seen set bounded by `capacity`
///
/// Entries are expected in `(time, id)` order. Pruning keeps the most recent
/// `retain` and remembers the newest key it dropped, so anything at or below
/// that mark stays reported even after its id is forgotten.
#[derive(Debug)]
pub struct SeenIds {
    order: VecDeque<(DateTime<Utc>, String)>,
    set: HashSet<String>,
    capacity: usize,
    retain: usize,
    floor: Option<(DateTime<Utc>, String)>,
}

impl SeenIds {
    pub fn new(capacity: usize, retain: usize) -> Self {
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
            capacity,
            retain: retain.min(capacity),
            floor: None,
        }
    }

    /// Record `id` observed at `at`; returns true the first time it is seen
    pub fn insert(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        if self.set.contains(id) || self.below_floor(id, at) {
            return false;
        }
        self.order.push_back((at, id.to_string()));
        self.set.insert(id.to_string());

        if self.order.len() > self.capacity {
            while self.order.len() > self.retain {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old.1);
                    if self.floor.as_ref().map_or(true, |floor| old > *floor) {
                        self.floor = Some(old);
                    }
                }
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn below_floor(&self, id: &str, at: DateTime<Utc>) -> bool {
        match &self.floor {
            Some((time, floor_id)) => (at, id) <= (*time, floor_id.as_str()),
            None => false,
        }
    }
}

/// What changed since the previous poll
#[derive(Debug, Clone, Default)]
pub struct ReaderUpdate {
    /// Present when the snapshot differs from the last one reported
    pub state: Option<AgentState>,
    pub new_thoughts: Vec<Thought>,
    /// Actions are reported once per status they are observed in
    pub new_actions: Vec<Action>,
}

impl ReaderUpdate {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.new_thoughts.is_empty() && self.new_actions.is_empty()
    }
}

pub struct StateReader {
    store: Arc<dyn ShortTermStore>,
    poll_interval: Duration,
    seen_thoughts: SeenIds,
    seen_actions: SeenIds,
    current: Option<AgentState>,
}

impl StateReader {
    pub fn new(store: Arc<dyn ShortTermStore>, config: &ReaderConfig) -> Self {
        Self {
            store,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            seen_thoughts: SeenIds::new(config.seen_capacity, config.seen_retain),
            seen_actions: SeenIds::new(config.seen_capacity, config.seen_retain),
            current: None,
        }
    }

    /// Last snapshot observed
    pub fn get_current_state(&self) -> Option<&AgentState> {
        self.current.as_ref()
    }

    /// Poll once and return only what is new
    pub async fn poll_once(&mut self) -> Result<ReaderUpdate> {
        let mut update = ReaderUpdate::default();

        if let Some(state) = self.read::<AgentState>(CURRENT_STATE_KEY).await? {
            if self.current.as_ref() != Some(&state) {
                self.current = Some(state.clone());
                update.state = Some(state);
            }
        }

        let mut thoughts = Vec::new();
        for key in self.store.keys(THOUGHT_PATTERN).await? {
            if let Some(thought) = self.read::<Thought>(&key).await? {
                thoughts.push(thought);
            }
        }
        thoughts.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        for thought in thoughts {
            if self.seen_thoughts.insert(&thought.id, thought.timestamp) {
                update.new_thoughts.push(thought);
            }
        }

        let mut actions = Vec::new();
        for key in self.store.keys(ACTION_PATTERN).await? {
            if let Some(action) = self.read::<Action>(&key).await? {
                actions.push(action);
            }
        }
        actions.sort_by(|a, b| (a.status_time(), &a.id).cmp(&(b.status_time(), &b.id)));
        for action in actions {
            let seen_key = format!("{}:{}", action.id, action.status);
            if self.seen_actions.insert(&seen_key, action.status_time()) {
                update.new_actions.push(action);
            }
        }

        Ok(update)
    }

    /// Poll until cancelled, forwarding non-empty updates
    pub async fn run(mut self, cancel: CancellationToken, tx: mpsc::Sender<ReaderUpdate>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once().await {
                Ok(update) if update.is_empty() => {}
                Ok(update) => {
                    if tx.send(update).await.is_err() {
                        debug!("Reader consumer went away");
                        break;
                    }
                }
                Err(e) => warn!("State poll failed: {}", e),
            }
        }
    }

    /// Missing keys and undecodable records both read as absent
    async fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match get_json::<T>(self.store.as_ref(), key).await {
            Ok(value) => Ok(value),
            Err(sdk::EngineError::Serialization(e)) => {
                debug!("Skipping undecodable record {}: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn at(second: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap() + ChronoDuration::seconds(second)
    }

    #[test]
    fn test_seen_ids_dedup() {
        let mut seen = SeenIds::new(10, 5);
        assert!(seen.insert("a", at(0)));
        assert!(!seen.insert("a", at(0)));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_seen_ids_prunes_to_retain() {
        let mut seen = SeenIds::new(1000, 500);
        for i in 0..1000 {
            seen.insert(&format!("{:04}", i), at(i));
        }
        assert_eq!(seen.len(), 1000);

        seen.insert("1000", at(1000));
        assert_eq!(seen.len(), 500);
        assert!(!seen.contains("0000"));
        assert!(!seen.contains("0500"));
        assert!(seen.contains("0501"));
        assert!(seen.contains("1000"));
    }

    #[test]
    fn test_pruned_ids_stay_reported() {
        let mut seen = SeenIds::new(4, 2);
        for i in 0..5 {
            assert!(seen.insert(&format!("t{}", i), at(i)));
        }
        assert!(!seen.contains("t0"));

        for i in 0..5 {
            assert!(!seen.insert(&format!("t{}", i), at(i)));
        }
        assert!(seen.insert("t5", at(5)));
    }

    #[test]
    fn test_equal_times_break_ties_by_id() {
        let mut seen = SeenIds::new(2, 1);
        assert!(seen.insert("a", at(0)));
        assert!(seen.insert("b", at(0)));
        assert!(seen.insert("c", at(0)));

        assert!(!seen.insert("a", at(0)));
        assert!(!seen.insert("b", at(0)));
        assert!(seen.insert("d", at(0)));
    }
}
