use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use tracing::{debug, info, warn};

use crate::{
    analysis::{FixedSuggestion, TradeSuggestion},
    builder::InitializeMarketParams,
    codec::BetSide,
    error::BridgeError,
    guardrails::creation::CreationRequest,
    service::{BridgeService, CreateMarketRequest, PlaceBetRequest},
    types::{
        parse_pubkey, Action, ErrorBody, Inbound, PreparedAtaResponse, PreparedTransactionResponse,
        SubmitAtaResponse, SubmitBetResponse, SubmitMarketResponse,
    },
};

/// WebSocket front for [`BridgeService`]; each request runs on its own task.
pub struct RelayServer {
    listen_addr: SocketAddr,
    service: Arc<BridgeService>,
}

impl RelayServer {
    pub fn new(listen_addr: SocketAddr, service: Arc<BridgeService>) -> Self {
        Self {
            listen_addr,
            service,
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("relay listening on ws://{}", self.listen_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            let me = self.clone();
            tokio::spawn(async move {
                if let Err(e) = me.handle_conn(stream, addr).await {
                    warn!(%addr, error = %e, "connection error");
                }
            });
        }
    }

    async fn handle_conn(self: Arc<Self>, stream: tokio::net::TcpStream, addr: SocketAddr) -> Result<()> {
        let ws = accept_async(stream).await?;
        info!(%addr, "new connection");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let (mut ws_tx, mut ws_rx) = ws.split();

        let write_task = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let Ok(text) = serde_json::to_string(&msg) else {
                    continue;
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "bye".into(),
                })))
                .await;
        });

        while let Some(Ok(msg)) = ws_rx.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let inbound = match serde_json::from_str::<Inbound>(&text) {
                Ok(inbound) => inbound,
                Err(e) => {
                    debug!(%addr, error = %e, "unparseable message");
                    let err = BridgeError::InvalidInput(format!("Unknown/invalid message: {e}"));
                    let _ = out_tx.send(error_message(None, None, &err));
                    continue;
                }
            };
            let service = self.service.clone();
            let out = out_tx.clone();
            tokio::spawn(async move {
                let reply = dispatch(&service, inbound).await;
                let _ = out.send(reply);
            });
        }

        drop(out_tx);
        // in-flight requests hold their own senders; the writer ends when they finish
        if let Err(e) = write_task.await {
            debug!(%addr, error = %e, "writer task ended abnormally");
        }
        info!(%addr, "disconnected");
        Ok(())
    }
}

fn result_message<T: Serialize>(id: Option<Value>, action: &str, data: T) -> Value {
    json!({ "type": "result", "id": id, "action": action, "data": data })
}

fn error_message(id: Option<Value>, action: Option<&str>, err: &BridgeError) -> Value {
    let mut body = serde_json::to_value(ErrorBody::from(err)).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut body {
        map.insert("type".into(), json!("error"));
        map.insert("id".into(), id.unwrap_or(Value::Null));
        map.insert("action".into(), action.map_or(Value::Null, |a| json!(a)));
    }
    body
}

/// Runs one request and renders its reply.
pub async fn dispatch(service: &BridgeService, inbound: Inbound) -> Value {
    let Inbound { id, action } = inbound;
    let name = action.name();
    match run_action(service, action).await {
        Ok(data) => result_message(id, name, data),
        Err(e) => {
            debug!(action = name, kind = e.kind(), error = %e, "request failed");
            error_message(id, Some(name), &e)
        }
    }
}

fn to_value<T: Serialize>(data: T) -> Result<Value, BridgeError> {
    serde_json::to_value(data).map_err(|e| BridgeError::InvalidInput(format!("unencodable response: {e}")))
}

async fn run_action(service: &BridgeService, action: Action) -> Result<Value, BridgeError> {
    match action {
        Action::FetchMarket { market_id } => to_value(service.fetch_market(market_id).await?),
        Action::FetchUserPosition { market_id, user } => {
            let user = parse_pubkey("user", &user)?;
            to_value(service.fetch_user_position(market_id, &user).await?)
        }
        Action::DeriveAta { user, mint } => {
            let user = parse_pubkey("user", &user)?;
            let mint = parse_pubkey("mint", &mint)?;
            to_value(service.derive_ata(&user, &mint).await?)
        }
        Action::PrecheckAta {
            market_id,
            user,
            user_usdc_ata,
        } => {
            let user = parse_pubkey("user", &user)?;
            let ata = parse_pubkey("user_usdc_ata", &user_usdc_ata)?;
            to_value(service.precheck_ata(market_id, &user, &ata).await?)
        }
        Action::PreparePlaceBet {
            market_id,
            user,
            user_usdc_ata,
            amount,
            bet_on_yes,
        } => {
            let req = PlaceBetRequest {
                market_id,
                user: parse_pubkey("user", &user)?,
                user_usdc_ata: parse_pubkey("user_usdc_ata", &user_usdc_ata)?,
                amount,
                side: BetSide::from_yes(bet_on_yes),
            };
            to_value(PreparedTransactionResponse::from(service.prepare_place_bet(&req).await?))
        }
        Action::PrepareInitializeMarket {
            market_id,
            creator,
            creator_usdc_ata,
            usdc_mint,
            question,
            duration,
            creator_type,
        } => {
            let req = CreateMarketRequest {
                params: InitializeMarketParams {
                    market_id,
                    creator: parse_pubkey("creator", &creator)?,
                    creator_usdc_ata: parse_pubkey("creator_usdc_ata", &creator_usdc_ata)?,
                    usdc_mint: parse_pubkey("usdc_mint", &usdc_mint)?,
                    question,
                    duration,
                },
                creator_type,
            };
            to_value(PreparedTransactionResponse::from(
                service.prepare_initialize_market(&req).await?,
            ))
        }
        Action::PrepareCreateAta { user, mint } => {
            let user = parse_pubkey("user", &user)?;
            let mint = parse_pubkey("mint", &mint)?;
            to_value(PreparedAtaResponse::from(service.prepare_create_ata(&user, &mint).await?))
        }
        Action::SubmitPlaceBet {
            signed_transaction,
            user,
        } => {
            let user = parse_pubkey("user", &user)?;
            to_value(SubmitBetResponse::from(
                service.submit_place_bet(&signed_transaction, &user).await?,
            ))
        }
        Action::SubmitInitializeMarket {
            signed_transaction,
            creator,
        } => {
            let creator = parse_pubkey("creator", &creator)?;
            to_value(SubmitMarketResponse::from(
                service.submit_initialize_market(&signed_transaction, &creator).await?,
            ))
        }
        Action::SubmitCreateAta {
            signed_transaction,
            user,
            mint,
        } => {
            let user = parse_pubkey("user", &user)?;
            let mint = parse_pubkey("mint", &mint)?;
            to_value(SubmitAtaResponse::from(
                service.submit_create_ata(&signed_transaction, &user, &mint).await?,
            ))
        }
        Action::EvaluateTrade {
            market_id,
            user,
            suggestion,
            balance,
        } => {
            let user = parse_pubkey("user", &user)?;
            let suggestion = TradeSuggestion::parse(&suggestion.to_string());
            to_value(service.evaluate_trade(&suggestion, market_id, &user, balance))
        }
        Action::EvaluateCreation {
            user,
            question,
            duration_seconds,
            creator_type,
        } => to_value(service.evaluate_creation(&CreationRequest {
            user,
            question,
            duration_seconds,
            creator_type,
        })?),
        Action::AnalyzeMarket {
            market_id,
            user,
            model_output,
        } => {
            let user = parse_pubkey("user", &user)?;
            let source = FixedSuggestion(model_output.unwrap_or_default());
            to_value(service.analyze_market(market_id, &user, &source).await?)
        }
        Action::FetchAllMarkets {} => to_value(service.fetch_all_markets().await?),
        Action::UserHistory { user, limit } => {
            let user = parse_pubkey("user", &user)?;
            to_value(service.transaction_history(&user, limit).await?)
        }
        Action::MarketHistory { market_id, limit } => {
            to_value(service.market_history(market_id, limit).await?)
        }
        Action::StatsOverview {} => to_value(service.stats_overview().await?),
        Action::MarketLeaderboard {} => to_value(service.market_leaderboard().await?),
        Action::CreatorLeaderboard {} => to_value(service.creator_leaderboard()),
    }
}
