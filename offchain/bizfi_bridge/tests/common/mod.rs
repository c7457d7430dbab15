#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};

use bizfi_bridge::{
    accounts::{encode_account, MarketRecord, MarketStatus},
    builder::FeePolicy,
    clock::ManualClock,
    config::GuardrailConfig,
    guardrails::GuardrailStores,
    interface::ProtocolInterface,
    ledger::{
        token_ui_amount, Ledger, LedgerError, ParsedTokenAccount, SignatureRecord, TokenAccountLookup,
    },
    protocol::{associated_token_address, AddressDeriver},
    audit::TracingAuditSink,
    service::{BridgeService, ServiceOptions},
};

pub const MARKET_ID: u64 = 42;
pub const FEE: u64 = 1_000_000;

/// In-memory ledger: accounts are whatever the test put there, and every
/// stored account is reported as program-owned.
pub struct StubLedger {
    accounts: DashMap<Pubkey, Vec<u8>>,
    tokens: DashMap<Pubkey, TokenAccountLookup>,
    history: DashMap<Pubkey, Vec<SignatureRecord>>,
    blockhash: Hash,
    blockhash_error: Mutex<Option<LedgerError>>,
    submit_error: Mutex<Option<LedgerError>>,
    submitted: Mutex<Vec<Transaction>>,
}

impl StubLedger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            tokens: DashMap::new(),
            history: DashMap::new(),
            blockhash: Hash::new_unique(),
            blockhash_error: Mutex::new(None),
            submit_error: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn put_account(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.insert(address, data);
    }

    pub fn put_token_account(&self, address: Pubkey, owner: Pubkey, mint: Pubkey, amount: u64) {
        self.accounts.insert(address, vec![0; 165]);
        self.tokens.insert(
            address,
            TokenAccountLookup::Token(ParsedTokenAccount {
                owner,
                mint,
                amount,
                amount_ui: token_ui_amount(amount),
            }),
        );
    }

    pub fn put_plain_account(&self, address: Pubkey) {
        self.accounts.insert(address, vec![1, 2, 3]);
        self.tokens.insert(address, TokenAccountLookup::NotTokenAccount);
    }

    /// Stores `count` signatures for `address`, newest (highest slot) first.
    pub fn put_history(&self, address: Pubkey, count: u64) {
        let records = (0..count)
            .rev()
            .map(|slot| SignatureRecord {
                signature: Signature::new_unique().to_string(),
                slot,
                block_time: Some(1_780_000_000 + slot as i64),
                err: None,
                memo: None,
            })
            .collect();
        self.history.insert(address, records);
    }

    pub fn fail_blockhash(&self, err: Option<LedgerError>) {
        *self.blockhash_error.lock() = err;
    }

    pub fn fail_submit(&self, err: Option<LedgerError>) {
        *self.submit_error.lock() = err;
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Ledger for StubLedger {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.accounts.get(address).map(|d| d.value().clone()))
    }

    async fn token_account(&self, address: &Pubkey) -> Result<TokenAccountLookup, LedgerError> {
        Ok(self
            .tokens
            .get(address)
            .map(|t| t.value().clone())
            .unwrap_or(TokenAccountLookup::Missing))
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        match self.blockhash_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(self.blockhash),
        }
    }

    async fn submit_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
        if let Some(e) = self.submit_error.lock().clone() {
            return Err(e);
        }
        self.submitted.lock().push(tx.clone());
        Ok(tx.signatures[0])
    }

    async fn program_accounts(&self, _program_id: &Pubkey) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError> {
        Ok(self
            .accounts
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect())
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, LedgerError> {
        Ok(self
            .history
            .get(address)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

pub struct Fixture {
    pub service: BridgeService,
    pub ledger: Arc<StubLedger>,
    pub deriver: AddressDeriver,
    pub clock: Arc<ManualClock>,
    pub mint: Pubkey,
    pub collector: Pubkey,
    pub user: Keypair,
    pub user_ata: Pubkey,
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

pub fn fixture(fee: u64) -> Fixture {
    fixture_with(fee, Ok(ProtocolInterface::builtin()), GuardrailStores::in_memory())
}

pub fn fixture_with(
    fee: u64,
    interface: Result<ProtocolInterface, String>,
    stores: GuardrailStores,
) -> Fixture {
    let program_id = Pubkey::new_unique();
    let deriver = AddressDeriver::new(program_id);
    let ledger = Arc::new(StubLedger::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let mint = Pubkey::new_unique();
    let collector = Pubkey::new_unique();
    let user = Keypair::new();
    let user_ata = associated_token_address(&user.pubkey(), &mint);
    ledger.put_token_account(user_ata, user.pubkey(), mint, 25_000_000);

    let opts = ServiceOptions {
        program_id,
        fee: FeePolicy::new(fee, (fee > 0).then_some(collector)),
        guardrails: GuardrailConfig::default(),
        interface,
    };
    let service = BridgeService::new(
        opts,
        ledger.clone(),
        stores,
        Arc::new(TracingAuditSink),
        clock.clone(),
    );
    Fixture {
        service,
        ledger,
        deriver,
        clock,
        mint,
        collector,
        user,
        user_ata,
    }
}

impl Fixture {
    /// Stores an active market account for `market_id` settled in `self.mint`.
    pub fn put_market(&self, market_id: u64, yes: u64, no: u64) {
        let record = MarketRecord {
            market_id,
            creator: Pubkey::new_unique().to_bytes(),
            question: "Will the pilot convert to a paid plan?".into(),
            end_time: start_time().timestamp() + 7 * 24 * 3600,
            status: MarketStatus::Active,
            total_pool: yes + no,
            yes_pool: yes,
            no_pool: no,
            outcome: false,
            usdc_mint: self.mint.to_bytes(),
            market_bump: 255,
            vault_bump: 255,
            vault_authority_bump: 255,
        };
        let data = encode_account("Market", &record).expect("encode market");
        self.ledger.put_account(self.deriver.market(market_id), data);
    }
}

pub fn decode(encoded: &str) -> Transaction {
    let raw = STANDARD.decode(encoded).expect("base64");
    bincode::deserialize(&raw).expect("bincode")
}

pub fn encode(tx: &Transaction) -> String {
    STANDARD.encode(bincode::serialize(tx).expect("serialize"))
}

/// Signs a prepared (unsigned) transaction the way a wallet would.
pub fn sign(encoded: &str, signer: &Keypair) -> String {
    let mut tx = decode(encoded);
    let blockhash = tx.message.recent_blockhash;
    tx.partial_sign(&[signer], blockhash);
    encode(&tx)
}
