mod common;

use serde_json::{json, Value};
use solana_sdk::signer::Signer;

use bizfi_bridge::{relay_server::dispatch, types::Inbound};
use common::{decode, fixture, MARKET_ID};

fn inbound(v: Value) -> Inbound {
    serde_json::from_value(v).unwrap()
}

#[tokio::test]
async fn prepare_reply_echoes_id_and_action() {
    let fx = fixture(0);
    fx.put_market(MARKET_ID, 10_000_000, 10_000_000);
    let reply = dispatch(
        &fx.service,
        inbound(json!({
            "id": 7,
            "action": "prepare_place_bet",
            "market_id": MARKET_ID,
            "user": fx.user.pubkey().to_string(),
            "user_usdc_ata": fx.user_ata.to_string(),
            "amount": 2_000_000u64,
            "bet_on_yes": true,
        })),
    )
    .await;

    assert_eq!(reply["type"], "result");
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["action"], "prepare_place_bet");
    let tx = decode(reply["data"]["transaction"].as_str().unwrap());
    assert_eq!(tx.message.account_keys[0], fx.user.pubkey());
    assert_eq!(
        reply["data"]["marketAddress"],
        fx.deriver.market(MARKET_ID).to_string()
    );
}

#[tokio::test]
async fn malformed_key_is_invalid_input() {
    let fx = fixture(0);
    let reply = dispatch(
        &fx.service,
        inbound(json!({
            "id": "a",
            "action": "derive_ata",
            "user": "not-a-key",
            "mint": fx.mint.to_string(),
        })),
    )
    .await;

    assert_eq!(reply["type"], "error");
    assert_eq!(reply["id"], "a");
    assert_eq!(reply["kind"], "invalid_input");
    assert_eq!(reply["retryable"], false);
    assert_eq!(reply["reason"], "user is not a valid public key");
}

#[tokio::test]
async fn precheck_failure_carries_details() {
    let fx = fixture(0);
    fx.put_market(MARKET_ID, 0, 0);
    let stranger = solana_sdk::pubkey::Pubkey::new_unique();
    let reply = dispatch(
        &fx.service,
        inbound(json!({
            "action": "precheck_ata",
            "market_id": MARKET_ID,
            "user": stranger.to_string(),
            "user_usdc_ata": fx.user_ata.to_string(),
        })),
    )
    .await;

    assert_eq!(reply["kind"], "precheck_failed");
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["details"]["expectedOwner"], stranger.to_string());
    assert_eq!(reply["details"]["owner"], fx.user.pubkey().to_string());
}

#[tokio::test]
async fn evaluate_trade_treats_bad_suggestion_as_abstain() {
    let fx = fixture(0);
    let reply = dispatch(
        &fx.service,
        inbound(json!({
            "action": "evaluate_trade",
            "market_id": MARKET_ID,
            "user": fx.user.pubkey().to_string(),
            "suggestion": { "suggested_side": "sideways" },
        })),
    )
    .await;

    assert_eq!(reply["type"], "result");
    assert_eq!(reply["data"]["allowed"], false);
    assert!(!reply["data"]["reasons"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn field_less_actions_dispatch() {
    let fx = fixture(0);
    fx.put_market(MARKET_ID, 2_000_000, 0);

    let reply = dispatch(&fx.service, inbound(json!({ "id": 1, "action": "stats_overview" }))).await;
    assert_eq!(reply["action"], "stats_overview");
    assert_eq!(reply["data"]["totalMarkets"], 1);
    assert_eq!(reply["data"]["totalPoolMicroUsdc"], 2_000_000);
    assert_eq!(reply["data"]["totalTrades"], 0);

    let reply = dispatch(&fx.service, inbound(json!({ "action": "fetch_all_markets" }))).await;
    assert_eq!(reply["data"][0]["marketId"], MARKET_ID);

    let reply = dispatch(&fx.service, inbound(json!({ "action": "creator_leaderboard" }))).await;
    assert_eq!(reply["data"], json!([]));
}

#[tokio::test]
async fn evaluate_creation_is_a_dry_run() {
    let fx = fixture(0);
    let request = json!({
        "action": "evaluate_creation",
        "user": fx.user.pubkey().to_string(),
        "question": "Will the beta cohort renew in May?",
        "duration_seconds": 86_400,
    });
    for _ in 0..2 {
        let reply = dispatch(&fx.service, inbound(request.clone())).await;
        assert_eq!(reply["data"]["allowed"], true, "{reply}");
    }
}
