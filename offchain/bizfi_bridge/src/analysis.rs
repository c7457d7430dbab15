//! Trade suggestions: parsing model output, sanity-normalizing it against the
//! live market, and the risk metrics handed to the model as context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    accounts::{MarketSnapshot, UserPositionSnapshot},
    guardrails::GuardrailDecision,
};

pub const MIN_MODEL_CONFIDENCE: f64 = 0.45;
/// Bet size the metrics are computed for: 5 USDC.
pub const REFERENCE_BET: u64 = 5_000_000;
const KELLY_BANKROLL: f64 = 100_000_000.0;
const FALLBACK_MIN_AMOUNT: u64 = 500_000;
const FALLBACK_MAX_AMOUNT: u64 = 2_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedSide {
    Yes,
    No,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSuggestion {
    #[serde(rename = "suggested_side")]
    pub side: SuggestedSide,
    /// micro-units
    #[serde(rename = "suggested_amount")]
    pub amount: u64,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_score: f64,
}

#[derive(Debug, Deserialize)]
struct RawSuggestion {
    suggested_side: SuggestedSide,
    suggested_amount: f64,
    confidence: f64,
    reasoning: String,
    risk_score: f64,
}

impl TradeSuggestion {
    pub fn abstain(reasoning: impl Into<String>) -> Self {
        Self {
            side: SuggestedSide::Abstain,
            amount: 0,
            confidence: 0.0,
            reasoning: reasoning.into(),
            risk_score: 1.0,
        }
    }

    /// Strict parse of model output, optionally wrapped in a ``` fence.
    pub fn try_parse(raw: &str) -> Result<Self, String> {
        let mut cleaned = raw.trim();
        if let Some(rest) = cleaned.strip_prefix("```") {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            cleaned = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
        }
        let parsed: RawSuggestion = serde_json::from_str(cleaned).map_err(|e| e.to_string())?;

        let unit = 0.0..=1.0;
        if !parsed.suggested_amount.is_finite() || parsed.suggested_amount < 0.0 {
            return Err("suggested_amount must be a non-negative number".into());
        }
        if !unit.contains(&parsed.confidence) {
            return Err("confidence must be within [0, 1]".into());
        }
        if !unit.contains(&parsed.risk_score) {
            return Err("risk_score must be within [0, 1]".into());
        }
        if parsed.reasoning.is_empty() {
            return Err("reasoning must not be empty".into());
        }
        Ok(Self {
            side: parsed.suggested_side,
            amount: parsed.suggested_amount.round() as u64,
            confidence: parsed.confidence,
            reasoning: parsed.reasoning,
            risk_score: parsed.risk_score,
        })
    }

    /// Any invalid output is equivalent to a zero-confidence abstain.
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "model output did not parse; abstaining");
            Self::abstain("AI output could not be parsed into valid trade analysis. Raw output was logged.")
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionOrigin {
    Llm,
    FallbackMicrostructure,
    FallbackNoLiquidity,
    FallbackInactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub source: SuggestionOrigin,
    pub fallback_triggered: bool,
    pub notes: Vec<String>,
}

impl Telemetry {
    fn fallback(source: SuggestionOrigin, notes: &[&str]) -> Self {
        Self {
            source,
            fallback_triggered: true,
            notes: notes.iter().map(|n| n.to_string()).collect(),
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Keeps a confident model suggestion, otherwise substitutes a conservative one.
pub fn normalize(suggestion: TradeSuggestion, market: &MarketSnapshot) -> (TradeSuggestion, Telemetry) {
    if !market.is_active || market.time_remaining <= 0 {
        return (
            TradeSuggestion::abstain("Market is inactive or expired. No new position should be opened."),
            Telemetry::fallback(SuggestionOrigin::FallbackInactive, &["Market inactive or expired"]),
        );
    }

    if suggestion.side != SuggestedSide::Abstain
        && suggestion.confidence >= MIN_MODEL_CONFIDENCE
        && suggestion.amount > 0
    {
        return (
            suggestion,
            Telemetry {
                source: SuggestionOrigin::Llm,
                fallback_triggered: false,
                notes: vec!["LLM output used directly".into()],
            },
        );
    }

    let total = market.total_pool;
    if total == 0 {
        return (
            TradeSuggestion {
                side: SuggestedSide::Abstain,
                amount: 0,
                confidence: 0.2,
                reasoning: "No liquidity is present yet, so price signals are not informative. \
                            Wait for more volume before trading."
                    .into(),
                risk_score: 1.0,
            },
            Telemetry::fallback(
                SuggestionOrigin::FallbackNoLiquidity,
                &["LLM low conviction", "Market has zero liquidity"],
            ),
        );
    }

    // contrarian against the heavier pool, sized small
    let imbalance = market.yes_pool.abs_diff(market.no_pool) as f64 / total as f64;
    let side = if market.yes_pool > market.no_pool {
        SuggestedSide::No
    } else {
        SuggestedSide::Yes
    };
    let amount = (total.saturating_mul(3) / 100).clamp(FALLBACK_MIN_AMOUNT, FALLBACK_MAX_AMOUNT);
    let reasoning = format!(
        "Model output was low-conviction, so fallback microstructure logic was applied. \
         Pool is imbalanced (YES: {:.1}%, NO: {:.1}%). \
         Suggested side is contrarian with small sizing to limit downside in a thin/imbalanced market.",
        market.yes_odds * 100.0,
        market.no_odds * 100.0
    );
    (
        TradeSuggestion {
            side,
            amount,
            confidence: round_to(0.58 + (imbalance * 0.35).min(0.2), 2),
            reasoning,
            risk_score: round_to(0.45 + (imbalance * 0.4).min(0.35), 2),
        },
        Telemetry::fallback(
            SuggestionOrigin::FallbackMicrostructure,
            &["LLM low conviction or abstain", "Contrarian imbalance heuristic applied"],
        ),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub expected_payout: i64,
    pub expected_value: i64,
    pub kelly_optimal_fraction: f64,
    pub kelly_optimal_amount: i64,
    pub max_potential_loss: u64,
    pub liquidity_impact: f64,
    pub time_risk_factor: f64,
    pub implied_probability: f64,
}

impl RiskMetrics {
    pub fn calculate(market: &MarketSnapshot, bet_on_yes: bool, amount: u64) -> Self {
        let bet = amount as f64;
        let new_total = (market.total_pool as f64) + bet;
        let winning_pool = bet
            + if bet_on_yes {
                market.yes_pool as f64
            } else {
                market.no_pool as f64
            };
        let expected_payout = if winning_pool > 0.0 {
            bet / winning_pool * new_total
        } else {
            0.0
        };

        let implied = if bet_on_yes { market.yes_odds } else { market.no_odds };
        let ev = expected_payout * implied - bet;

        let payout_ratio = if bet > 0.0 { expected_payout / bet - 1.0 } else { 0.0 };
        let kelly = if payout_ratio > 0.0 {
            ((payout_ratio * implied - (1.0 - implied)) / payout_ratio).max(0.0)
        } else {
            0.0
        };

        let liquidity_impact = if market.total_pool > 0 {
            bet / market.total_pool as f64
        } else {
            1.0
        };

        let hours = market.time_remaining as f64 / 3600.0;
        let time_risk_factor = if hours < 24.0 {
            0.8
        } else if hours < 72.0 {
            0.5
        } else {
            0.2
        };

        Self {
            expected_payout: expected_payout.round() as i64,
            expected_value: ev.round() as i64,
            kelly_optimal_fraction: round_to(kelly, 4),
            kelly_optimal_amount: (kelly * KELLY_BANKROLL).round() as i64,
            max_potential_loss: amount,
            liquidity_impact: round_to(liquidity_impact, 4),
            time_risk_factor,
            implied_probability: round_to(implied, 4),
        }
    }
}

/// Produces raw model output for a market. Prompting and invocation live behind this.
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn suggest(
        &self,
        market: &MarketSnapshot,
        position: Option<&UserPositionSnapshot>,
        metrics: &RiskMetrics,
    ) -> anyhow::Result<String>;
}

/// Replays output obtained elsewhere, e.g. relayed by a client.
#[derive(Debug, Clone, Default)]
pub struct FixedSuggestion(pub String);

#[async_trait]
impl SuggestionSource for FixedSuggestion {
    async fn suggest(
        &self,
        _market: &MarketSnapshot,
        _position: Option<&UserPositionSnapshot>,
        _metrics: &RiskMetrics,
    ) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub market_id: u64,
    pub user: String,
    pub analysis: TradeSuggestion,
    pub telemetry: Telemetry,
    pub guardrails: GuardrailDecision,
    pub market_data: Option<MarketSnapshot>,
    pub user_position: Option<UserPositionSnapshot>,
    pub risk_metrics: Option<RiskMetrics>,
    pub timestamp: DateTime<Utc>,
}
