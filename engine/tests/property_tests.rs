use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;
use tempfile::TempDir;

use kestrel_engine::admission::{backoff_duration, AdmissionController, AdmissionLimits};
use kestrel_engine::config::Config;
use kestrel_engine::db::Database;
use kestrel_engine::memory::context::{details_excerpt, group_by_type, select_active};
use kestrel_engine::memory::ContextSettings;
use sdk::types::{AgentState, MemoryEntry, MemoryType, Thought, MAX_RECENT_THOUGHTS};

fn memory_type() -> impl Strategy<Value = MemoryType> {
    prop::sample::select(MemoryType::ALL.to_vec())
}

fn entries() -> impl Strategy<Value = Vec<MemoryEntry>> {
    prop::collection::vec((memory_type(), 0.0..=1.0f64, 0i64..500), 0..80).prop_map(|specs| {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (memory_type, importance, age_hours))| {
                MemoryEntry::new(memory_type, format!("content {}", i), format!("m{}", i), importance)
                    .with_timestamp(now - ChronoDuration::hours(age_hours))
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn test_config_toml_round_trip(
        log_level in "error|warn|info|debug|trace",
        think in 1..=3600u64,
        loops in 1..=10_000u64,
        tokens in 1..=10_000_000u64,
        threshold in 0.0..=1.0f64,
        context_size in 1..=100usize,
    ) {
        let mut config = Config::default();
        config.core.log_level = log_level;
        config.agent.think_interval_seconds = think;
        config.budget.max_loops_per_day = loops;
        config.budget.max_tokens_per_day = tokens;
        config.consolidation.promotion_importance_threshold = threshold;
        config.memory.context_size = context_size;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        prop_assert_eq!(parsed.core.log_level, config.core.log_level);
        prop_assert_eq!(parsed.agent.think_interval_seconds, think);
        prop_assert_eq!(parsed.budget.max_loops_per_day, loops);
        prop_assert_eq!(parsed.budget.max_tokens_per_day, tokens);
        prop_assert_eq!(parsed.consolidation.promotion_importance_threshold, threshold);
        prop_assert_eq!(parsed.memory.context_size, context_size);
    }

    #[test]
    fn test_recent_thoughts_are_the_latest_twenty(count in 0..60usize) {
        let mut state = AgentState::new("");
        let thoughts: Vec<Thought> = (0..count)
            .map(|i| Thought::observation(format!("t{}", i)))
            .collect();
        for thought in &thoughts {
            state.push_thought(thought.clone());
        }

        let expected = &thoughts[count.saturating_sub(MAX_RECENT_THOUGHTS)..];
        prop_assert!(state.recent_thoughts.len() <= MAX_RECENT_THOUGHTS);
        prop_assert_eq!(&state.recent_thoughts[..], expected);
    }

    #[test]
    fn test_active_set_and_groups_are_bounded(
        candidates in entries(),
        context_size in 1..30usize,
        per_type_limit in 1..8usize,
    ) {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let settings = ContextSettings {
            context_size,
            per_type_limit,
            ..ContextSettings::default()
        };
        let total = candidates.len();

        let active = select_active(candidates, now, &settings);
        prop_assert_eq!(active.len(), total.min(context_size));
        for pair in active.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }

        let groups = group_by_type(&active, per_type_limit);
        let mut seen = std::collections::HashSet::new();
        for (memory_type, members) in &groups {
            prop_assert!(!members.is_empty());
            prop_assert!(members.len() <= per_type_limit);
            prop_assert!(seen.insert(*memory_type));
            prop_assert!(members.iter().all(|m| m.entry.memory_type == *memory_type));
        }
    }

    #[test]
    fn test_details_excerpt_is_a_bounded_prefix(content in ".{0,400}") {
        let excerpt = details_excerpt(&content);
        let chars = content.chars().count();

        if chars <= 200 {
            prop_assert_eq!(excerpt, content);
        } else {
            let body = excerpt.strip_suffix("...").unwrap();
            prop_assert_eq!(body.chars().count(), 200);
            prop_assert!(content.starts_with(body));
        }
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped(n in 1..200u32) {
        let current = backoff_duration(n);
        prop_assert!(current <= Duration::from_secs(3600));
        prop_assert!(backoff_duration(n + 1) >= current);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_admission_matches_ceilings(
        max_loops in 0..6u64,
        max_tokens in 0..600u64,
        per_loop in 0..200u64,
        recorded in 0..8usize,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (allowed, usage) = runtime.block_on(async {
            let temp_dir = TempDir::new().unwrap();
            let db = Database::new(&temp_dir.path().join("kestrel.db")).await.unwrap();
            let admission = AdmissionController::new(
                db.pool().clone(),
                AdmissionLimits {
                    max_loops_per_day: max_loops,
                    max_tokens_per_day: max_tokens,
                    warn_ratio: 0.9,
                },
            );
            let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
            for _ in 0..recorded {
                admission.record_consumption_at(per_loop, now).await.unwrap();
            }
            let decision = admission.can_proceed_at(now).await.unwrap();
            db.close().await.unwrap();
            (decision.allowed, decision.usage)
        });

        prop_assert_eq!(usage.loop_count, recorded as u64);
        prop_assert_eq!(usage.estimated_tokens, per_loop * recorded as u64);
        prop_assert_eq!(
            allowed,
            usage.loop_count < max_loops && usage.estimated_tokens < max_tokens
        );
    }
}
