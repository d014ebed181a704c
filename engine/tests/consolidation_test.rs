//! Integration tests for consolidation
//!
//! Records are written the way the agent writes them (through the state
//! manager) and promoted by the consolidation service over the same store.

use kestrel_engine::db::Database;
use kestrel_engine::memory::importance::{ImportancePolicy, ShortTermItem};
use kestrel_engine::memory::{
    ConsolidationService, ConsolidationSettings, InMemoryStore, LongTermStore, RetryPolicy,
    ShortTermStore, SqliteMemoryStore,
};
use kestrel_engine::state::{StateManager, StateSettings};
use sdk::keys::{action_key, thought_key, THOUGHT_PATTERN};
use sdk::types::{
    Action, ActionStatus, AgentState, MemoryEntry, MemoryType, Thought, ThoughtContent,
    ThoughtType,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Scores thoughts by a fixed table, actions by status
struct TablePolicy;

impl ImportancePolicy for TablePolicy {
    fn name(&self) -> &str {
        "table"
    }

    fn score(&self, item: &ShortTermItem, _recent: &[MemoryEntry]) -> f64 {
        match item {
            ShortTermItem::Thought(t) => match t.thought_type {
                ThoughtType::Decision => 0.9,
                ThoughtType::Reflection => 0.5,
                _ => 0.49,
            },
            ShortTermItem::Action(a) if a.status == ActionStatus::Failed => 0.8,
            ShortTermItem::Action(_) => 0.1,
        }
    }
}

fn thought(thought_type: ThoughtType, text: &str) -> Thought {
    Thought::new(
        thought_type,
        ThoughtContent::PlainText {
            text: text.to_string(),
        },
    )
}

async fn sqlite_setup() -> (TempDir, Arc<SqliteMemoryStore>, StateManager) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("kestrel.db"))
        .await
        .unwrap();
    let store = Arc::new(db.memory_store());
    let state = StateManager::new(
        AgentState::new("prompt"),
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        StateSettings::default(),
        RetryPolicy::none(),
    );
    (temp_dir, store, state)
}

fn service(store: &Arc<SqliteMemoryStore>) -> ConsolidationService {
    ConsolidationService::new(
        Arc::clone(store) as Arc<dyn ShortTermStore>,
        Arc::clone(store) as Arc<dyn LongTermStore>,
        ConsolidationSettings::default(),
        RetryPolicy::none(),
    )
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let (_dir, store, state) = sqlite_setup().await;
    state
        .add_thought(thought(ThoughtType::Decision, "adopt the new parser"))
        .await
        .unwrap();
    state
        .add_thought(thought(ThoughtType::Reflection, "that went fine"))
        .await
        .unwrap();
    state
        .add_thought(thought(ThoughtType::Observation, "nothing new"))
        .await
        .unwrap();

    let consolidation = service(&store).with_policy(Box::new(TablePolicy));
    let report = consolidation.run_once().await.unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.promoted, 2);
    let summaries: Vec<String> = store
        .recent_entries(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.summary)
        .collect();
    assert!(summaries.contains(&"adopt the new parser".to_string()));
    assert!(summaries.contains(&"that went fine".to_string()));
    assert!(!summaries.contains(&"nothing new".to_string()));
}

#[tokio::test]
async fn test_repeated_pass_promotes_duplicates() {
    let (_dir, store, state) = sqlite_setup().await;
    let decision = thought(ThoughtType::Decision, "split the crate in two");
    let key = thought_key(&decision.id);
    state.add_thought(decision).await.unwrap();

    // The default policy keeps a decision above 0.5 even once it is not novel
    let consolidation = service(&store);
    let first = consolidation.run_once().await.unwrap();
    let second = consolidation.run_once().await.unwrap();
    assert_eq!(first.promoted, 1);
    assert_eq!(second.promoted, 1);

    let entries = store.recent_entries(10).await.unwrap();
    let from_source: Vec<&MemoryEntry> = entries
        .iter()
        .filter(|e| e.source_id.as_deref() == Some(key.as_str()))
        .collect();
    assert_eq!(from_source.len(), 2);
    assert_ne!(from_source[0].id, from_source[1].id);
    assert!(from_source.iter().all(|e| e.tags.contains("consolidated")));

    // Short-term is read-only to consolidation
    assert_eq!(store.keys(THOUGHT_PATTERN).await.unwrap(), vec![key]);
}

#[tokio::test]
async fn test_completed_action_promoted_on_every_pass() {
    let (_dir, store, state) = sqlite_setup().await;
    let action = Action::pending("read_file", "{\"path\":\"notes.txt\"}");
    let key = action_key(&action.id);
    let id = action.id.clone();
    state.add_action(action).await.unwrap();
    state
        .update_action(&id, ActionStatus::Running, None)
        .await
        .unwrap();
    state
        .update_action(&id, ActionStatus::Completed, Some("buy milk".into()))
        .await
        .unwrap();

    let consolidation = service(&store);
    let first = consolidation.run_once().await.unwrap();
    let second = consolidation.run_once().await.unwrap();
    assert_eq!(first.promoted, 1);
    assert_eq!(second.promoted, 1);

    let entries = store.recent_entries(10).await.unwrap();
    let from_source = entries
        .iter()
        .filter(|e| e.source_id.as_deref() == Some(key.as_str()))
        .count();
    assert_eq!(from_source, 2);
}

#[tokio::test]
async fn test_long_term_count_never_decreases() {
    let (_dir, store, state) = sqlite_setup().await;
    let consolidation = service(&store).with_policy(Box::new(TablePolicy));

    let mut last = store.count().await.unwrap();
    for round in 0..4 {
        state
            .add_thought(thought(ThoughtType::Decision, &format!("decision {}", round)))
            .await
            .unwrap();
        consolidation.run_once().await.unwrap();
        consolidation.batch_learning().await.unwrap();

        let count = store.count().await.unwrap();
        assert!(count >= last, "round {}: {} < {}", round, count, last);
        last = count;
    }
    // Rounds promote 1, 2, 3 and 4 live decisions
    assert_eq!(last, 10);
}

#[tokio::test]
async fn test_failed_actions_cluster_into_learning() {
    let (_dir, store, state) = sqlite_setup().await;
    for path in ["a.txt", "b.txt"] {
        let action = Action::pending("read_file", format!("{{\"path\":\"{}\"}}", path));
        let id = action.id.clone();
        state.add_action(action).await.unwrap();
        state
            .update_action(&id, ActionStatus::Failed, Some("ERROR: not found".into()))
            .await
            .unwrap();
    }

    let consolidation = service(&store).with_policy(Box::new(TablePolicy));
    let report = consolidation.run_once().await.unwrap();
    assert_eq!(report.promoted, 2);
    assert_eq!(report.learnings, 1);

    let learnings = store.learnings().await.unwrap();
    assert_eq!(learnings.len(), 1);
    assert_eq!(learnings[0].topic, "read_file");
    assert_eq!(learnings[0].source_memory_ids.len(), 2);
    assert!((learnings[0].confidence - 0.8).abs() < 1e-9);

    let entries = store.recent_entries(10).await.unwrap();
    assert!(entries.iter().all(|e| e.memory_type == MemoryType::Error));
}

#[tokio::test]
async fn test_batch_learning_only_clusters() {
    let store = Arc::new(InMemoryStore::new());
    for summary in ["config parsed", "config reloaded"] {
        store
            .append(
                &MemoryEntry::new(MemoryType::Success, summary, summary, 0.7)
                    .with_tag("topic:config"),
            )
            .await
            .unwrap();
    }
    store
        .append(&MemoryEntry::new(MemoryType::Success, "low", "low", 0.2).with_tag("topic:config"))
        .await
        .unwrap();

    let consolidation = ConsolidationService::new(
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        Arc::clone(&store) as Arc<dyn LongTermStore>,
        ConsolidationSettings::default(),
        RetryPolicy::none(),
    );
    assert_eq!(consolidation.batch_learning().await.unwrap(), 1);

    let learnings = store.learnings().await.unwrap();
    assert_eq!(learnings[0].source_memory_ids.len(), 2);
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_store_failure_surfaces_after_retries() {
    let store = Arc::new(InMemoryStore::new());
    store
        .set(
            &thought_key("t1"),
            &serde_json::to_string(&thought(ThoughtType::Decision, "x")).unwrap(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    store.fail_next(10);

    let consolidation = ConsolidationService::new(
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        Arc::clone(&store) as Arc<dyn LongTermStore>,
        ConsolidationSettings::default(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    );
    let err = consolidation.run_once().await.unwrap_err();
    assert!(matches!(err, sdk::EngineError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_service_stops_on_cancel() {
    let store = Arc::new(InMemoryStore::new());
    let consolidation = Arc::new(ConsolidationService::new(
        Arc::clone(&store) as Arc<dyn ShortTermStore>,
        Arc::clone(&store) as Arc<dyn LongTermStore>,
        ConsolidationSettings {
            interval: Duration::from_millis(20),
            ..ConsolidationSettings::default()
        },
        RetryPolicy::none(),
    ));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&consolidation).run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(70)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("service stops promptly")
        .unwrap();
}
