pub mod creation;
pub mod store;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    analysis::{SuggestedSide, TradeSuggestion},
    clock::Clock,
    config::GuardrailConfig,
};
use creation::{content_reasons, normalize_question, CreationRequest, CreatorType};
use store::{
    CreationQuotaEntry, DailyBudgetEntry, GuardrailStore, InMemoryStore, RecentQuestionEntry,
    StoreEntry, StoreError,
};

/// Prefix of reasons that inform but never block.
pub const WARNING_PREFIX: &str = "WARNING";
pub const HIGH_RISK_SCORE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardrailDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

impl GuardrailDecision {
    fn from_reasons(reasons: Vec<String>) -> Self {
        let allowed = reasons.iter().all(|r| r.starts_with(WARNING_PREFIX));
        Self { allowed, reasons }
    }

    pub fn blocking_reasons(&self) -> impl Iterator<Item = &str> {
        self.reasons
            .iter()
            .map(String::as_str)
            .filter(|r| !r.starts_with(WARNING_PREFIX))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.reasons
            .iter()
            .map(String::as_str)
            .filter(|r| r.starts_with(WARNING_PREFIX))
    }
}

/// The three keyed maps the engine reads and writes.
#[derive(Clone)]
pub struct GuardrailStores {
    pub budgets: Arc<dyn GuardrailStore<DailyBudgetEntry>>,
    pub quotas: Arc<dyn GuardrailStore<CreationQuotaEntry>>,
    pub questions: Arc<dyn GuardrailStore<RecentQuestionEntry>>,
}

impl GuardrailStores {
    pub fn in_memory() -> Self {
        Self {
            budgets: Arc::new(InMemoryStore::new()),
            quotas: Arc::new(InMemoryStore::new()),
            questions: Arc::new(InMemoryStore::new()),
        }
    }
}

pub struct GuardrailEngine {
    cfg: GuardrailConfig,
    stores: GuardrailStores,
    clock: Arc<dyn Clock>,
    // spans the quota and question keys of one creation
    creation_lock: Mutex<()>,
}

impl GuardrailEngine {
    pub fn new(cfg: GuardrailConfig, stores: GuardrailStores, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            stores,
            clock,
            creation_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.cfg
    }

    /// Amount recorded for `user` today; a stale entry reads as zero.
    pub fn daily_budget_spent(&self, user: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        Ok(match self.stores.budgets.get(user)? {
            Some(entry) if !entry.is_stale(now) => entry.total,
            _ => 0,
        })
    }

    /// Evaluates a suggested trade. Never mutates guardrail state.
    pub fn evaluate_trade(
        &self,
        suggestion: &TradeSuggestion,
        market_id: u64,
        user: &str,
        balance: u64,
    ) -> GuardrailDecision {
        let cfg = &self.cfg;
        let mut reasons = Vec::new();

        if suggestion.confidence < cfg.confidence_threshold {
            reasons.push(format!(
                "Confidence {:.1}% is below threshold {:.1}%",
                suggestion.confidence * 100.0,
                cfg.confidence_threshold * 100.0
            ));
        }

        if suggestion.side == SuggestedSide::Abstain {
            reasons.push("AI recommends abstaining from this market".to_string());
        }

        let max_allocation =
            (u128::from(balance) * u128::from(cfg.max_allocation_percent) / 100) as u64;
        if suggestion.amount > max_allocation {
            reasons.push(format!(
                "Suggested amount {} exceeds max allocation {} ({}% of balance)",
                suggestion.amount, max_allocation, cfg.max_allocation_percent
            ));
        }

        match self.daily_budget_spent(user) {
            Ok(spent) => {
                if spent.saturating_add(suggestion.amount) > cfg.daily_risk_budget {
                    reasons.push(format!(
                        "Daily risk budget would be exceeded. Current: {}, Proposed: {}, Budget: {}",
                        spent, suggestion.amount, cfg.daily_risk_budget
                    ));
                }
            }
            Err(e) => {
                warn!(user, error = %e, "daily budget unreadable");
                reasons.push("Daily risk budget state is unavailable".to_string());
            }
        }

        if !cfg.market_whitelist.is_empty() && !cfg.market_whitelist.contains(&market_id) {
            reasons.push(format!("Market {market_id} is not in the whitelist"));
        }

        if suggestion.risk_score > HIGH_RISK_SCORE {
            reasons.push(format!(
                "{WARNING_PREFIX} High risk score: {:.1}% - proceed with caution",
                suggestion.risk_score * 100.0
            ));
        }

        GuardrailDecision::from_reasons(reasons)
    }

    /// Records an executed trade. Call only after the ledger confirmed it.
    pub fn record_spend(&self, user: &str, amount: u64) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let entry = self.stores.budgets.upsert(user, &mut |prev| match prev {
            Some(e) if !e.is_stale(now) => DailyBudgetEntry {
                total: e.total.saturating_add(amount),
                day: today,
            },
            _ => DailyBudgetEntry {
                total: amount,
                day: today,
            },
        })?;
        info!(user, amount, total = entry.total, "recorded daily spend");
        Ok(entry.total)
    }

    fn creation_limit(&self, creator: CreatorType) -> u32 {
        match creator {
            CreatorType::Human => self.cfg.human_daily_create_limit,
            CreatorType::Agent => self.cfg.agent_daily_create_limit,
        }
    }

    /// Evaluates a market creation without recording anything.
    pub fn check_creation(&self, req: &CreationRequest) -> Result<GuardrailDecision, StoreError> {
        let _guard = self.creation_lock.lock();
        Ok(self.creation_decision(req)?.0)
    }

    /// Evaluates a market creation; on success the quota and duplicate window commit.
    pub fn evaluate_creation(&self, req: &CreationRequest) -> Result<GuardrailDecision, StoreError> {
        let _guard = self.creation_lock.lock();
        let (decision, count_today) = self.creation_decision(req)?;
        if decision.allowed {
            self.commit_creation(req, count_today)?;
            info!(user = %req.user, count = count_today + 1, "market creation allowed");
        }
        Ok(decision)
    }

    fn creation_decision(&self, req: &CreationRequest) -> Result<(GuardrailDecision, u32), StoreError> {
        let now = self.clock.now();
        let mut reasons = content_reasons(&req.question, req.duration_seconds);

        let count_today = match self.stores.quotas.get(&req.user)? {
            Some(entry) if !entry.is_stale(now) => entry.count,
            _ => 0,
        };
        let limit = self.creation_limit(req.creator_type);
        if count_today >= limit {
            reasons.push(format!("Daily market creation limit reached ({limit}/day)."));
        }

        if !self
            .stores
            .questions
            .is_stale(&normalize_question(&req.question), now)?
        {
            reasons.push("Duplicate question submitted recently.".to_string());
        }

        let decision = GuardrailDecision {
            allowed: reasons.is_empty(),
            reasons,
        };
        Ok((decision, count_today))
    }

    /// Question first, then quota. A failed quota write restores the question
    /// entry so a failed call leaves both stores as they were.
    fn commit_creation(&self, req: &CreationRequest, count_today: u32) -> Result<(), StoreError> {
        let now = self.clock.now();
        let normalized = normalize_question(&req.question);

        let previous = self.stores.questions.get(&normalized)?;
        self.stores
            .questions
            .upsert(&normalized, &mut |_| RecentQuestionEntry { seen_at: now })?;

        let quota = self.stores.quotas.upsert(&req.user, &mut |_| CreationQuotaEntry {
            count: count_today + 1,
            day: now.date_naive(),
        });
        if let Err(e) = quota {
            let restored = match previous {
                Some(prev) => self.stores.questions.upsert(&normalized, &mut |_| prev).map(|_| ()),
                None => self.stores.questions.remove(&normalized).map(|_| ()),
            };
            if let Err(undo) = restored {
                warn!(user = %req.user, error = %undo, "could not restore recent question entry");
            }
            return Err(e);
        }
        Ok(())
    }
}
