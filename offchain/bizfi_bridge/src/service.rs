//! The operations the bridge exposes. Prepare builds unsigned transactions,
//! submit verifies what the client signed before relaying it, and the
//! evaluate operations run the guardrails.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::{error, info, warn};

use crate::{
    accounts::{MarketRecord, MarketSnapshot, UserPositionSnapshot},
    analysis::{
        normalize, AnalysisReport, RiskMetrics, SuggestionOrigin, SuggestionSource, Telemetry,
        TradeSuggestion, REFERENCE_BET,
    },
    audit::{AuditKind, AuditRecord, AuditSink, TracingAuditSink},
    builder::{FeePolicy, InitializeMarketParams, PreparedAta, PreparedTransaction, TransactionBuilder},
    clock::Clock,
    codec::BetSide,
    config::{BridgeConfig, GuardrailConfig},
    error::BridgeError,
    guardrails::{
        creation::{CreationRequest, CreatorType},
        GuardrailDecision, GuardrailEngine, GuardrailStores,
    },
    interface::ProtocolInterface,
    ledger::{token_ui_amount, Ledger, SignatureRecord, TokenAccountLookup},
    metrics::{CreatorActivity, Metrics, MetricsSnapshot},
    precheck::{TokenAccountDetails, TokenAccountPrecheck},
    protocol::{associated_token_address, AddressDeriver},
    reader::MarketReader,
    verifier::{decode_signed, TransactionVerifier},
};

/// Balance assumed when a trade evaluation does not name one: 100 USDC.
pub const DEFAULT_EVALUATION_BALANCE: u64 = 100_000_000;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
/// Largest page `getSignaturesForAddress` serves.
pub const MAX_HISTORY_LIMIT: usize = 1000;
pub const LEADERBOARD_SIZE: usize = 10;

/// What the service needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub program_id: Pubkey,
    pub fee: FeePolicy,
    pub guardrails: GuardrailConfig,
    pub interface: Result<ProtocolInterface, String>,
}

impl ServiceOptions {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        let interface = match &cfg.idl_path {
            Some(path) => ProtocolInterface::load(path).map_err(|e| e.to_string()),
            None => Ok(ProtocolInterface::builtin()),
        };
        Self {
            program_id: cfg.program_id,
            fee: FeePolicy::new(cfg.creation_fee, cfg.fee_collector),
            guardrails: cfg.guardrails.clone(),
            interface,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtaInfo {
    pub ata: String,
    pub exists: bool,
    pub amount_ui: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOverview {
    pub total_markets: usize,
    pub active_markets: usize,
    pub total_pool_micro_usdc: u64,
    pub total_pool_usdc: f64,
    #[serde(flatten)]
    pub activity: MetricsSnapshot,
    pub fee_collector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceBetRequest {
    pub market_id: u64,
    pub user: Pubkey,
    pub user_usdc_ata: Pubkey,
    pub amount: u64,
    pub side: BetSide,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMarketRequest {
    pub params: InitializeMarketParams,
    pub creator_type: CreatorType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedBet {
    pub signature: Signature,
    pub verified_amount: u64,
    pub side: BetSide,
    pub market_address: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedMarket {
    pub signature: Signature,
    pub market_address: Pubkey,
    pub market_id: u64,
    pub fee_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAta {
    pub signature: Signature,
    pub ata: Pubkey,
}

pub struct BridgeService {
    deriver: AddressDeriver,
    ledger: Arc<dyn Ledger>,
    reader: MarketReader,
    builder: TransactionBuilder,
    verifier: TransactionVerifier,
    precheck: TokenAccountPrecheck,
    guardrails: GuardrailEngine,
    metrics: Metrics,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl BridgeService {
    pub fn new(
        opts: ServiceOptions,
        ledger: Arc<dyn Ledger>,
        stores: GuardrailStores,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let deriver = AddressDeriver::new(opts.program_id);
        Self {
            deriver,
            reader: MarketReader::new(deriver, ledger.clone(), opts.interface, clock.clone()),
            builder: TransactionBuilder::new(deriver, ledger.clone(), opts.fee),
            verifier: TransactionVerifier::new(deriver, opts.fee),
            precheck: TokenAccountPrecheck::new(ledger.clone()),
            guardrails: GuardrailEngine::new(opts.guardrails, stores, clock.clone()),
            metrics: Metrics::new(),
            ledger,
            audit,
            clock,
        }
    }

    pub fn guardrails(&self) -> &GuardrailEngine {
        &self.guardrails
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // ---------- reads ----------

    pub async fn fetch_market(&self, market_id: u64) -> Result<Option<MarketSnapshot>, BridgeError> {
        self.reader.fetch_market(market_id).await
    }

    pub async fn fetch_user_position(
        &self,
        market_id: u64,
        user: &Pubkey,
    ) -> Result<Option<UserPositionSnapshot>, BridgeError> {
        self.reader.fetch_user_position(market_id, user).await
    }

    pub async fn derive_ata(&self, owner: &Pubkey, mint: &Pubkey) -> Result<AtaInfo, BridgeError> {
        let ata = associated_token_address(owner, mint);
        let (exists, amount_ui) = match self.ledger.token_account(&ata).await? {
            TokenAccountLookup::Missing => (false, 0.0),
            TokenAccountLookup::NotTokenAccount => (true, 0.0),
            TokenAccountLookup::Token(parsed) => (true, parsed.amount_ui),
        };
        Ok(AtaInfo {
            ata: ata.to_string(),
            exists,
            amount_ui,
        })
    }

    pub async fn fetch_all_markets(&self) -> Result<Vec<MarketSnapshot>, BridgeError> {
        self.reader.fetch_all_markets().await
    }

    /// Recent signatures touching `address`.
    pub async fn transaction_history(
        &self,
        address: &Pubkey,
        limit: Option<usize>,
    ) -> Result<Vec<SignatureRecord>, BridgeError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.ledger.signatures_for_address(address, limit).await?)
    }

    /// History of the market account itself.
    pub async fn market_history(
        &self,
        market_id: u64,
        limit: Option<usize>,
    ) -> Result<Vec<SignatureRecord>, BridgeError> {
        self.transaction_history(&self.deriver.market(market_id), limit)
            .await
    }

    pub async fn stats_overview(&self) -> Result<StatsOverview, BridgeError> {
        let markets = self.fetch_all_markets().await?;
        let total_pool = markets
            .iter()
            .fold(0u64, |sum, m| sum.saturating_add(m.total_pool));
        Ok(StatsOverview {
            total_markets: markets.len(),
            active_markets: markets.iter().filter(|m| m.is_active).count(),
            total_pool_micro_usdc: total_pool,
            total_pool_usdc: (token_ui_amount(total_pool) * 100.0).round() / 100.0,
            activity: self.metrics.snapshot(),
            fee_collector: self.builder.fee_policy().collector.map(|c| c.to_string()),
        })
    }

    /// Markets with the deepest pools first.
    pub async fn market_leaderboard(&self) -> Result<Vec<MarketSnapshot>, BridgeError> {
        let mut markets = self.fetch_all_markets().await?;
        markets.sort_by(|a, b| b.total_pool.cmp(&a.total_pool));
        markets.truncate(LEADERBOARD_SIZE);
        Ok(markets)
    }

    pub fn creator_leaderboard(&self) -> Vec<CreatorActivity> {
        self.metrics.creator_activity()
    }

    async fn market_record(&self, market_id: u64) -> Result<MarketRecord, BridgeError> {
        let address = self.deriver.market(market_id);
        self.reader
            .fetch_market_record(&address)
            .await?
            .ok_or_else(|| BridgeError::InvalidInput(format!("Market {market_id} not found")))
    }

    /// Checks `user_usdc_ata` against the market's settlement mint.
    pub async fn precheck_ata(
        &self,
        market_id: u64,
        user: &Pubkey,
        user_usdc_ata: &Pubkey,
    ) -> Result<TokenAccountDetails, BridgeError> {
        let market = self.market_record(market_id).await?;
        let mint = Pubkey::new_from_array(market.usdc_mint);
        self.precheck.precheck(user_usdc_ata, user, &mint).await
    }

    // ---------- prepare ----------

    pub async fn prepare_place_bet(
        &self,
        req: &PlaceBetRequest,
    ) -> Result<PreparedTransaction, BridgeError> {
        self.precheck_ata(req.market_id, &req.user, &req.user_usdc_ata)
            .await?;
        self.builder
            .build_place_bet(req.market_id, &req.user, &req.user_usdc_ata, req.amount, req.side)
            .await
    }

    /// Guardrails run last so that a failed or timed-out network step never
    /// consumes quota.
    pub async fn prepare_initialize_market(
        &self,
        req: &CreateMarketRequest,
    ) -> Result<PreparedTransaction, BridgeError> {
        let p = &req.params;
        if self.builder.fee_policy().amount > 0 {
            self.precheck
                .precheck(&p.creator_usdc_ata, &p.creator, &p.usdc_mint)
                .await?;
        }
        let prepared = self.builder.build_initialize_market(p).await?;

        let decision = self.guardrails.evaluate_creation(&CreationRequest {
            user: p.creator.to_string(),
            question: p.question.clone(),
            duration_seconds: p.duration,
            creator_type: req.creator_type,
        })?;
        if !decision.allowed {
            info!(creator = %p.creator, reasons = ?decision.reasons, "market creation blocked");
            self.audit(AuditRecord {
                kind: AuditKind::CreationBlocked,
                user: p.creator.to_string(),
                market_id: Some(p.market_id),
                payload: json!({ "question": p.question, "reasons": decision.reasons }),
                created_at: self.clock.now(),
            })
            .await;
            return Err(BridgeError::Guardrail(decision));
        }
        Ok(prepared)
    }

    pub async fn prepare_create_ata(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<PreparedAta, BridgeError> {
        self.builder.build_create_ata(owner, mint).await
    }

    // ---------- verify + submit ----------

    pub async fn submit_place_bet(
        &self,
        signed: &str,
        user: &Pubkey,
    ) -> Result<SubmittedBet, BridgeError> {
        let tx = decode_signed(signed)?;
        let bet = self.verifier.verify_place_bet(&tx, user)?;

        let market = self
            .reader
            .fetch_market_record(&bet.market_address)
            .await?
            .ok_or_else(|| {
                BridgeError::InvalidInput(format!("Market account {} not found", bet.market_address))
            })?;
        let mint = Pubkey::new_from_array(market.usdc_mint);
        self.precheck.precheck(&bet.user_usdc_ata, user, &mint).await?;

        let signature = self.ledger.submit_transaction(&tx).await?;
        info!(%signature, user = %user, amount = bet.amount, market = %bet.market_address, "bet submitted");

        let user_key = user.to_string();
        if let Err(e) = self.guardrails.record_spend(&user_key, bet.amount) {
            // the transfer already happened; report it and keep going
            error!(%signature, user = %user, error = %e, "failed to record daily spend");
        }
        self.metrics.record_trade(&user_key, bet.amount, self.clock.now());
        self.audit(AuditRecord {
            kind: AuditKind::BetSubmitted,
            user: user_key,
            market_id: Some(market.market_id),
            payload: json!({
                "signature": signature.to_string(),
                "amount": bet.amount,
                "bet_on_yes": bet.side.is_yes(),
            }),
            created_at: self.clock.now(),
        })
        .await;

        Ok(SubmittedBet {
            signature,
            verified_amount: bet.amount,
            side: bet.side,
            market_address: bet.market_address,
        })
    }

    pub async fn submit_initialize_market(
        &self,
        signed: &str,
        creator: &Pubkey,
    ) -> Result<SubmittedMarket, BridgeError> {
        let tx = decode_signed(signed)?;
        let created = self.verifier.verify_initialize_market(&tx, creator)?;
        if let Some(source) = created.creator_usdc_ata {
            self.precheck.precheck(&source, creator, &created.usdc_mint).await?;
        }

        let signature = self.ledger.submit_transaction(&tx).await?;
        info!(%signature, creator = %creator, market_id = created.market_id, "market created");
        self.metrics
            .record_create(&creator.to_string(), created.fee_amount, self.clock.now());
        self.audit(AuditRecord {
            kind: AuditKind::MarketCreated,
            user: creator.to_string(),
            market_id: Some(created.market_id),
            payload: json!({
                "signature": signature.to_string(),
                "question": created.question,
                "duration": created.duration,
                "fee_amount": created.fee_amount,
            }),
            created_at: self.clock.now(),
        })
        .await;

        Ok(SubmittedMarket {
            signature,
            market_address: created.market_address,
            market_id: created.market_id,
            fee_amount: created.fee_amount,
        })
    }

    pub async fn submit_create_ata(
        &self,
        signed: &str,
        user: &Pubkey,
        mint: &Pubkey,
    ) -> Result<SubmittedAta, BridgeError> {
        let tx = decode_signed(signed)?;
        let ata = self.verifier.verify_create_ata(&tx, user, mint)?;
        let signature = self.ledger.submit_transaction(&tx).await?;
        info!(%signature, user = %user, ata = %ata, "token account created");
        Ok(SubmittedAta { signature, ata })
    }

    // ---------- guardrails ----------

    pub fn evaluate_trade(
        &self,
        suggestion: &TradeSuggestion,
        market_id: u64,
        user: &Pubkey,
        balance: Option<u64>,
    ) -> GuardrailDecision {
        self.guardrails.evaluate_trade(
            suggestion,
            market_id,
            &user.to_string(),
            balance.unwrap_or(DEFAULT_EVALUATION_BALANCE),
        )
    }

    /// Dry run of the creation guardrails. Only `prepare_initialize_market`
    /// consumes quota and records the question.
    pub fn evaluate_creation(&self, req: &CreationRequest) -> Result<GuardrailDecision, BridgeError> {
        Ok(self.guardrails.check_creation(req)?)
    }

    /// Market and position context, model suggestion, normalization, guardrails.
    pub async fn analyze_market(
        &self,
        market_id: u64,
        user: &Pubkey,
        source: &dyn SuggestionSource,
    ) -> Result<AnalysisReport, BridgeError> {
        let user_key = user.to_string();
        let Some(market) = self.reader.fetch_market(market_id).await? else {
            let analysis = TradeSuggestion::abstain(format!(
                "Market {market_id} not found on-chain. It may not exist yet or the RPC connection failed."
            ));
            let guardrails = self.evaluate_trade(&analysis, market_id, user, None);
            return Ok(AnalysisReport {
                market_id,
                user: user_key,
                analysis,
                telemetry: Telemetry {
                    source: SuggestionOrigin::FallbackInactive,
                    fallback_triggered: true,
                    notes: vec!["Market account not found on-chain".into()],
                },
                guardrails,
                market_data: None,
                user_position: None,
                risk_metrics: None,
                timestamp: self.clock.now(),
            });
        };

        let position = self.reader.fetch_user_position(market_id, user).await?;
        let metrics = RiskMetrics::calculate(&market, true, REFERENCE_BET);

        let raw = match source.suggest(&market, position.as_ref(), &metrics).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(market_id, error = %e, "suggestion source failed");
                String::new()
            }
        };
        let (analysis, telemetry) = normalize(TradeSuggestion::parse(&raw), &market);
        let guardrails = self.evaluate_trade(&analysis, market_id, user, None);
        self.metrics.record_analysis(&user_key, market_id, self.clock.now());

        let report = AnalysisReport {
            market_id,
            user: user_key,
            analysis,
            telemetry,
            guardrails,
            market_data: Some(market),
            user_position: position,
            risk_metrics: Some(metrics),
            timestamp: self.clock.now(),
        };
        self.audit(AuditRecord {
            kind: AuditKind::Analysis,
            user: report.user.clone(),
            market_id: Some(market_id),
            payload: json!({
                "analysis": report.analysis,
                "guardrail_result": report.guardrails,
                "action_taken": if report.guardrails.allowed {
                    serde_json::to_value(report.analysis.side).unwrap_or_default()
                } else {
                    json!("blocked")
                },
                "market_data_snapshot": report.market_data,
            }),
            created_at: report.timestamp,
        })
        .await;
        Ok(report)
    }

    async fn audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.record(&record).await {
            warn!(error = %e, kind = ?record.kind, "audit sink failed; logging record instead");
            let _ = TracingAuditSink.record(&record).await;
        }
    }
}
