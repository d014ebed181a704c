//! Integration tests for the state reader
//!
//! The agent side writes through a state manager on one database connection;
//! the reader polls through another, as `kestrel watch` does.

use kestrel_engine::config::ReaderConfig;
use kestrel_engine::db::Database;
use kestrel_engine::memory::{InMemoryStore, RetryPolicy, ShortTermStore};
use kestrel_engine::reader::StateReader;
use kestrel_engine::state::{StateManager, StateSettings};
use sdk::types::{Action, ActionStatus, AgentState, AgentStatus, Thought};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Pair {
    _dir: TempDir,
    agent: StateManager,
    agent_store: Arc<dyn ShortTermStore>,
    reader: StateReader,
}

fn reader_config() -> ReaderConfig {
    ReaderConfig {
        poll_interval_ms: 10,
        ..ReaderConfig::default()
    }
}

async fn pair() -> Pair {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kestrel.db");
    let agent_db = Database::new(&path).await.unwrap();
    let reader_db = Database::new(&path).await.unwrap();

    let agent_store: Arc<dyn ShortTermStore> = Arc::new(agent_db.memory_store());
    let agent = StateManager::new(
        AgentState::new("watch the build"),
        Arc::clone(&agent_store),
        StateSettings::default(),
        RetryPolicy::none(),
    );
    let reader = StateReader::new(Arc::new(reader_db.memory_store()), &reader_config());

    Pair {
        _dir: dir,
        agent,
        agent_store,
        reader,
    }
}

#[tokio::test]
async fn test_nothing_published_yet() {
    let mut p = pair().await;

    let update = p.reader.poll_once().await.unwrap();
    assert!(update.is_empty());
    assert!(p.reader.get_current_state().is_none());
}

#[tokio::test]
async fn test_thoughts_reported_once() {
    let mut p = pair().await;
    for text in ["compiling", "tests pass", "all green"] {
        p.agent.add_thought(Thought::observation(text)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = p.reader.poll_once().await.unwrap();
    let texts: Vec<String> = first
        .new_thoughts
        .iter()
        .map(|t| t.content.text())
        .collect();
    assert_eq!(texts, vec!["compiling", "tests pass", "all green"]);
    assert_eq!(first.state.unwrap().recent_thoughts.len(), 3);

    assert!(p.reader.poll_once().await.unwrap().is_empty());

    p.agent
        .add_thought(Thought::observation("deploying"))
        .await
        .unwrap();
    let next = p.reader.poll_once().await.unwrap();
    assert_eq!(next.new_thoughts.len(), 1);
    assert_eq!(next.new_thoughts[0].content.text(), "deploying");
    assert!(next.state.is_some());
}

#[tokio::test]
async fn test_action_reported_per_observed_status() {
    let mut p = pair().await;
    let action = Action::pending("list_dir", "{\"path\":\".\"}");
    let id = action.id.clone();
    p.agent.add_action(action).await.unwrap();

    let pending = p.reader.poll_once().await.unwrap();
    assert_eq!(pending.new_actions.len(), 1);
    assert_eq!(pending.new_actions[0].status, ActionStatus::Pending);

    // Running is overwritten before the next poll and never observed
    p.agent
        .update_action(&id, ActionStatus::Running, None)
        .await
        .unwrap();
    p.agent
        .update_action(&id, ActionStatus::Completed, Some("src\ntests".into()))
        .await
        .unwrap();

    let completed = p.reader.poll_once().await.unwrap();
    assert_eq!(completed.new_actions.len(), 1);
    assert_eq!(completed.new_actions[0].status, ActionStatus::Completed);
    assert_eq!(completed.new_actions[0].output.as_deref(), Some("src\ntests"));

    assert!(p.reader.poll_once().await.unwrap().new_actions.is_empty());
}

#[tokio::test]
async fn test_status_change_surfaces_state() {
    let mut p = pair().await;
    p.agent.republish().await.unwrap();
    p.reader.poll_once().await.unwrap();

    p.agent.set_status(AgentStatus::Paused).await.unwrap();
    let update = p.reader.poll_once().await.unwrap();
    assert_eq!(update.state.unwrap().status, AgentStatus::Paused);
    assert_eq!(
        p.reader.get_current_state().unwrap().status,
        AgentStatus::Paused
    );
}

#[tokio::test]
async fn test_undecodable_records_are_skipped() {
    let mut p = pair().await;
    p.agent_store
        .set("thought:garbled", "{not json", Duration::from_secs(60))
        .await
        .unwrap();
    p.agent
        .add_thought(Thought::observation("fine"))
        .await
        .unwrap();

    let update = p.reader.poll_once().await.unwrap();
    assert_eq!(update.new_thoughts.len(), 1);
    assert_eq!(update.new_thoughts[0].content.text(), "fine");
}

#[tokio::test]
async fn test_more_live_records_than_seen_capacity() {
    let store: Arc<dyn ShortTermStore> = Arc::new(InMemoryStore::new());
    let agent = StateManager::new(
        AgentState::new("long run"),
        Arc::clone(&store),
        StateSettings::default(),
        RetryPolicy::none(),
    );
    let config = ReaderConfig::default();
    let mut reader = StateReader::new(Arc::clone(&store), &config);

    let live = config.seen_capacity + 200;
    for i in 0..live {
        agent
            .add_thought(Thought::observation(format!("step {}", i)))
            .await
            .unwrap();
    }

    let first = reader.poll_once().await.unwrap();
    assert_eq!(first.new_thoughts.len(), live);
    assert!(reader.poll_once().await.unwrap().new_thoughts.is_empty());
    assert!(reader.poll_once().await.unwrap().new_thoughts.is_empty());

    agent
        .add_thought(Thought::observation("one more"))
        .await
        .unwrap();
    let next = reader.poll_once().await.unwrap();
    assert_eq!(next.new_thoughts.len(), 1);
    assert_eq!(next.new_thoughts[0].content.text(), "one more");
}

#[tokio::test]
async fn test_run_forwards_updates_until_cancelled() {
    let p = pair().await;
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(p.reader.run(cancel.clone(), tx));

    p.agent
        .add_thought(Thought::observation("hello from the agent"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while seen.is_empty() {
        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("reader forwards the thought")
            .unwrap();
        seen.extend(update.new_thoughts);
    }
    assert_eq!(seen[0].content.text(), "hello from the agent");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
