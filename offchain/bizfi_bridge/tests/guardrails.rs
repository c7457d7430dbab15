mod common;

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::Duration;
use solana_sdk::signer::Signer;

use bizfi_bridge::{
    analysis::{FixedSuggestion, SuggestedSide, SuggestionOrigin, TradeSuggestion},
    clock::{Clock, ManualClock},
    config::GuardrailConfig,
    guardrails::{
        creation::{CreationRequest, CreatorType},
        store::{
            CreationQuotaEntry, DailyBudgetEntry, FileStore, GuardrailStore, InMemoryStore,
            RecentQuestionEntry,
        },
        GuardrailEngine, GuardrailStores, WARNING_PREFIX,
    },
    interface::ProtocolInterface,
};
use common::{fixture, fixture_with, start_time, MARKET_ID};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "bizfi-guardrails-{tag}-{}-{nanos}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn file_stores(dir: &std::path::Path) -> GuardrailStores {
    GuardrailStores {
        budgets: Arc::new(FileStore::<DailyBudgetEntry>::open(dir.join("budgets.json")).unwrap()),
        quotas: Arc::new(FileStore::<CreationQuotaEntry>::open(dir.join("quotas.json")).unwrap()),
        questions: Arc::new(FileStore::<RecentQuestionEntry>::open(dir.join("questions.json")).unwrap()),
    }
}

/// Each test body runs against the in-memory and the file-backed stores.
fn both_stores(tag: &str) -> Vec<GuardrailStores> {
    vec![GuardrailStores::in_memory(), file_stores(&temp_dir(tag))]
}

fn engine(stores: GuardrailStores) -> (GuardrailEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    (
        GuardrailEngine::new(GuardrailConfig::default(), stores, clock.clone()),
        clock,
    )
}

fn creation(user: &str, question: &str) -> CreationRequest {
    CreationRequest {
        user: user.into(),
        question: question.into(),
        duration_seconds: 3600,
        creator_type: CreatorType::Human,
    }
}

#[test]
fn low_confidence_trade_is_blocked() {
    let fx = fixture(0);
    let suggestion = TradeSuggestion {
        side: SuggestedSide::Yes,
        amount: 1_000_000,
        confidence: 0.5,
        reasoning: "slight edge".into(),
        risk_score: 0.2,
    };
    let decision = fx
        .service
        .evaluate_trade(&suggestion, MARKET_ID, &fx.user.pubkey(), Some(100_000_000));
    assert!(!decision.allowed);
    assert!(decision.reasons.iter().any(|r| r.starts_with("Confidence 50.0%")));
}

#[test]
fn warnings_never_block() {
    let fx = fixture(0);
    let suggestion = TradeSuggestion {
        side: SuggestedSide::No,
        amount: 1_000_000,
        confidence: 0.9,
        reasoning: "strong".into(),
        risk_score: 0.99,
    };
    let decision = fx.service.evaluate_trade(&suggestion, MARKET_ID, &fx.user.pubkey(), None);
    assert!(decision.allowed);
    assert!(decision.reasons.iter().all(|r| r.starts_with(WARNING_PREFIX)));
}

#[test]
fn question_without_mark_gets_exactly_one_reason() {
    for stores in both_stores("mark") {
        let (engine, _) = engine(stores);
        let decision = engine.evaluate_creation(&creation("alice", "will this work ok")).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["Question should end with a '?'."]);
    }
}

#[test]
fn duplicate_questions_are_rejected_across_users_within_a_day() {
    for stores in both_stores("dup") {
        let (engine, clock) = engine(stores);
        let first = engine
            .evaluate_creation(&creation("alice", "Will our beta reach 500 users?"))
            .unwrap();
        assert!(first.allowed);

        let second = engine
            .evaluate_creation(&creation("bob", "  will OUR beta   reach 500 users? "))
            .unwrap();
        assert!(!second.allowed);
        assert_eq!(second.reasons, vec!["Duplicate question submitted recently."]);

        clock.advance(Duration::hours(24));
        let later = engine
            .evaluate_creation(&creation("bob", "Will our beta reach 500 users?"))
            .unwrap();
        assert!(later.allowed);
    }
}

#[test]
fn creation_quota_resets_at_utc_midnight() {
    for stores in both_stores("quota") {
        let (engine, clock) = engine(stores);
        for i in 0..4 {
            let d = engine
                .evaluate_creation(&creation("carol", &format!("Will release {i} ship on time?")))
                .unwrap();
            assert!(d.allowed, "{:?}", d.reasons);
        }
        let blocked = engine
            .evaluate_creation(&creation("carol", "Will release 9 ship on time?"))
            .unwrap();
        assert_eq!(blocked.reasons, vec!["Daily market creation limit reached (4/day)."]);

        // 08:00 + 16h is midnight of the next day
        clock.advance(Duration::hours(16));
        assert!(engine
            .evaluate_creation(&creation("carol", "Will release 9 ship on time?"))
            .unwrap()
            .allowed);
    }
}

#[test]
fn budget_tracks_confirmed_spend_only() {
    for stores in both_stores("budget") {
        let (engine, clock) = engine(stores);
        let big = TradeSuggestion {
            side: SuggestedSide::Yes,
            amount: 9_000_000,
            confidence: 0.9,
            reasoning: "r".into(),
            risk_score: 0.1,
        };
        assert!(engine.evaluate_trade(&big, 1, "dave", 1_000_000_000).allowed);
        for _ in 0..5 {
            engine.record_spend("dave", 9_000_000).unwrap();
        }
        let decision = engine.evaluate_trade(&big, 1, "dave", 1_000_000_000);
        assert_eq!(
            decision.reasons,
            vec!["Daily risk budget would be exceeded. Current: 45000000, Proposed: 9000000, Budget: 50000000"]
        );

        clock.advance(Duration::days(1));
        assert_eq!(engine.daily_budget_spent("dave").unwrap(), 0);
        assert!(engine.evaluate_trade(&big, 1, "dave", 1_000_000_000).allowed);
    }
}

#[test]
fn concurrent_spends_are_not_lost() {
    for stores in both_stores("concurrent") {
        let (engine, _) = engine(stores);
        let engine = Arc::new(engine);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        engine.record_spend("erin", 10).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(engine.daily_budget_spent("erin").unwrap(), 8 * 25 * 10);
    }
}

#[test]
fn file_store_survives_reopen() {
    let dir = temp_dir("reopen");
    let clock = ManualClock::new(start_time());
    {
        let store = FileStore::<DailyBudgetEntry>::open(dir.join("budgets.json")).unwrap();
        store
            .upsert("frank", &mut |_| DailyBudgetEntry {
                total: 123,
                day: clock.now().date_naive(),
            })
            .unwrap();
    }
    let reopened = FileStore::<DailyBudgetEntry>::open(dir.join("budgets.json")).unwrap();
    assert_eq!(reopened.get("frank").unwrap().unwrap().total, 123);
    assert!(!reopened.is_stale("frank", clock.now()).unwrap());

    std::fs::write(dir.join("broken.json"), "{ not json").unwrap();
    assert!(FileStore::<DailyBudgetEntry>::open(dir.join("broken.json")).is_err());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn in_memory_store_is_independent_per_key() {
    let store: InMemoryStore<RecentQuestionEntry> = InMemoryStore::new();
    let now = start_time();
    store.upsert("a", &mut |_| RecentQuestionEntry { seen_at: now }).unwrap();
    assert!(!store.is_stale("a", now).unwrap());
    assert!(store.is_stale("b", now).unwrap());
}

#[tokio::test]
async fn analysis_falls_back_on_unusable_model_output() {
    let fx = fixture(0);
    fx.put_market(MARKET_ID, 30_000_000, 10_000_000);
    let report = fx
        .service
        .analyze_market(MARKET_ID, &fx.user.pubkey(), &FixedSuggestion("I think yes!".into()))
        .await
        .unwrap();
    assert_eq!(report.telemetry.source, SuggestionOrigin::FallbackMicrostructure);
    assert_eq!(report.analysis.side, SuggestedSide::No);
    assert!(report.risk_metrics.is_some());
    assert!(report.market_data.is_some());
    assert_eq!(fx.service.metrics().snapshot().total_analyses, 1);
}

#[tokio::test]
async fn analysis_of_empty_market_takes_no_liquidity_path() {
    let fx = fixture(0);
    fx.put_market(MARKET_ID, 0, 0);
    let report = fx
        .service
        .analyze_market(MARKET_ID, &fx.user.pubkey(), &FixedSuggestion::default())
        .await
        .unwrap();
    assert_eq!(report.telemetry.source, SuggestionOrigin::FallbackNoLiquidity);
    assert_eq!(report.risk_metrics.unwrap().liquidity_impact, 1.0);
    assert!(!report.guardrails.allowed);
}

#[tokio::test]
async fn analysis_of_missing_market_abstains() {
    let fx = fixture_with(0, Ok(ProtocolInterface::builtin()), GuardrailStores::in_memory());
    let report = fx
        .service
        .analyze_market(MARKET_ID, &fx.user.pubkey(), &FixedSuggestion::default())
        .await
        .unwrap();
    assert_eq!(report.analysis.side, SuggestedSide::Abstain);
    assert_eq!(report.telemetry.source, SuggestionOrigin::FallbackInactive);
    assert!(report.market_data.is_none());
}
