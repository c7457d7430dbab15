//! Wire messages exchanged with relay clients.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use crate::{
    builder::{PreparedAta, PreparedTransaction},
    error::BridgeError,
    guardrails::creation::CreatorType,
    precheck::TokenAccountDetails,
    service::{SubmittedAta, SubmittedBet, SubmittedMarket},
};

const EXPLORER_TX_URL: &str = "https://explorer.solana.com/tx/";
const EXPLORER_CLUSTER: &str = "?cluster=devnet";

/// One inbound request. `id` is echoed back on the response.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    FetchMarket {
        market_id: u64,
    },
    FetchUserPosition {
        market_id: u64,
        user: String,
    },
    DeriveAta {
        user: String,
        mint: String,
    },
    PrecheckAta {
        market_id: u64,
        user: String,
        user_usdc_ata: String,
    },
    PreparePlaceBet {
        market_id: u64,
        user: String,
        user_usdc_ata: String,
        amount: u64,
        bet_on_yes: bool,
    },
    PrepareInitializeMarket {
        market_id: u64,
        creator: String,
        creator_usdc_ata: String,
        usdc_mint: String,
        question: String,
        duration: i64,
        #[serde(default = "default_creator_type")]
        creator_type: CreatorType,
    },
    PrepareCreateAta {
        user: String,
        mint: String,
    },
    SubmitPlaceBet {
        signed_transaction: String,
        user: String,
    },
    SubmitInitializeMarket {
        signed_transaction: String,
        creator: String,
    },
    SubmitCreateAta {
        signed_transaction: String,
        user: String,
        mint: String,
    },
    EvaluateTrade {
        market_id: u64,
        user: String,
        suggestion: Value,
        #[serde(default)]
        balance: Option<u64>,
    },
    EvaluateCreation {
        user: String,
        question: String,
        duration_seconds: i64,
        #[serde(default = "default_creator_type")]
        creator_type: CreatorType,
    },
    AnalyzeMarket {
        market_id: u64,
        user: String,
        /// raw model output relayed by the client
        #[serde(default)]
        model_output: Option<String>,
    },
    FetchAllMarkets {},
    UserHistory {
        user: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    MarketHistory {
        market_id: u64,
        #[serde(default)]
        limit: Option<usize>,
    },
    StatsOverview {},
    MarketLeaderboard {},
    CreatorLeaderboard {},
}

fn default_creator_type() -> CreatorType {
    CreatorType::Human
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::FetchMarket { .. } => "fetch_market",
            Action::FetchUserPosition { .. } => "fetch_user_position",
            Action::DeriveAta { .. } => "derive_ata",
            Action::PrecheckAta { .. } => "precheck_ata",
            Action::PreparePlaceBet { .. } => "prepare_place_bet",
            Action::PrepareInitializeMarket { .. } => "prepare_initialize_market",
            Action::PrepareCreateAta { .. } => "prepare_create_ata",
            Action::SubmitPlaceBet { .. } => "submit_place_bet",
            Action::SubmitInitializeMarket { .. } => "submit_initialize_market",
            Action::SubmitCreateAta { .. } => "submit_create_ata",
            Action::EvaluateTrade { .. } => "evaluate_trade",
            Action::EvaluateCreation { .. } => "evaluate_creation",
            Action::AnalyzeMarket { .. } => "analyze_market",
            Action::FetchAllMarkets {} => "fetch_all_markets",
            Action::UserHistory { .. } => "user_history",
            Action::MarketHistory { .. } => "market_history",
            Action::StatsOverview {} => "stats_overview",
            Action::MarketLeaderboard {} => "market_leaderboard",
            Action::CreatorLeaderboard {} => "creator_leaderboard",
        }
    }
}

pub fn parse_pubkey(field: &str, raw: &str) -> Result<Pubkey, BridgeError> {
    Pubkey::from_str(raw.trim())
        .map_err(|_| BridgeError::InvalidInput(format!("{field} is not a valid public key")))
}

pub fn explorer_url(signature: &Signature) -> String {
    format!("{EXPLORER_TX_URL}{signature}{EXPLORER_CLUSTER}")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTransactionResponse {
    pub message: &'static str,
    pub transaction: String,
    pub market_address: String,
}

impl From<PreparedTransaction> for PreparedTransactionResponse {
    fn from(p: PreparedTransaction) -> Self {
        Self {
            message: "Transaction prepared. Sign with your wallet to execute.",
            transaction: p.transaction,
            market_address: p.address.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedAtaResponse {
    pub transaction: String,
    pub ata: String,
    pub already_exists: bool,
}

impl From<PreparedAta> for PreparedAtaResponse {
    fn from(p: PreparedAta) -> Self {
        Self {
            transaction: p.transaction,
            ata: p.ata.to_string(),
            already_exists: p.already_exists,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBetResponse {
    pub signature: String,
    pub explorer: String,
    pub verified_amount: u64,
    pub bet_on_yes: bool,
    pub market_address: String,
}

impl From<SubmittedBet> for SubmitBetResponse {
    fn from(s: SubmittedBet) -> Self {
        Self {
            signature: s.signature.to_string(),
            explorer: explorer_url(&s.signature),
            verified_amount: s.verified_amount,
            bet_on_yes: s.side.is_yes(),
            market_address: s.market_address.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMarketResponse {
    pub signature: String,
    pub explorer: String,
    pub market_address: String,
    pub market_id: u64,
    pub fee_amount: u64,
}

impl From<SubmittedMarket> for SubmitMarketResponse {
    fn from(s: SubmittedMarket) -> Self {
        Self {
            signature: s.signature.to_string(),
            explorer: explorer_url(&s.signature),
            market_address: s.market_address.to_string(),
            market_id: s.market_id,
            fee_amount: s.fee_amount,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAtaResponse {
    pub signature: String,
    pub explorer: String,
    pub ata: String,
}

impl From<SubmittedAta> for SubmitAtaResponse {
    fn from(s: SubmittedAta) -> Self {
        Self {
            signature: s.signature.to_string(),
            explorer: explorer_url(&s.signature),
            ata: s.ata.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub reason: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TokenAccountDetails>,
}

impl From<&BridgeError> for ErrorBody {
    fn from(e: &BridgeError) -> Self {
        let (reasons, details) = match e {
            BridgeError::Guardrail(d) => (Some(d.reasons.clone()), None),
            BridgeError::Precheck(f) => (None, f.details().cloned()),
            _ => (None, None),
        };
        Self {
            kind: e.kind(),
            reason: e.to_string(),
            retryable: e.is_retryable(),
            reasons,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_action_is_tagged() {
        let raw = r#"{"id":7,"action":"prepare_place_bet","market_id":3,"user":"u","user_usdc_ata":"a","amount":5,"bet_on_yes":true}"#;
        let msg: Inbound = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.id, Some(Value::from(7)));
        assert_eq!(msg.action.name(), "prepare_place_bet");
        match msg.action {
            Action::PreparePlaceBet { market_id, amount, .. } => assert_eq!((market_id, amount), (3, 5)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn creator_type_defaults_to_human() {
        let raw = r#"{"action":"evaluate_creation","user":"u","question":"q","duration_seconds":3600}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap().action {
            Action::EvaluateCreation { creator_type, .. } => assert_eq!(creator_type, CreatorType::Human),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_amount_is_rejected_at_parse() {
        let raw = r#"{"action":"prepare_place_bet","market_id":3,"user":"u","user_usdc_ata":"a","amount":-5,"bet_on_yes":true}"#;
        assert!(serde_json::from_str::<Inbound>(raw).is_err());
    }

    #[test]
    fn guardrail_error_lists_reasons() {
        let err = BridgeError::Guardrail(crate::guardrails::GuardrailDecision {
            allowed: false,
            reasons: vec!["Duplicate question submitted recently.".into()],
        });
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, "guardrail_blocked");
        assert!(!body.retryable);
        assert_eq!(body.reasons.unwrap().len(), 1);
    }
}
