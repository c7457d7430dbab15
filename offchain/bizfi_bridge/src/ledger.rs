use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, program_pack::Pack, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use spl_token::{id as spl_token_program_id, state::Account as TokenAccount};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::protocol::TOKEN_SCALE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger call {call} timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },
    #[error("transaction rejected by ledger: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Network-side failures may be retried by the caller; rejections may not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LedgerError::Rejected(_))
    }
}

/// Parsed view of an SPL token account.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTokenAccount {
    pub owner: Pubkey,
    pub mint: Pubkey,
    pub amount: u64,
    pub amount_ui: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenAccountLookup {
    Missing,
    NotTokenAccount,
    Token(ParsedTokenAccount),
}

/// One entry of an address's signature history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub err: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStatus {
    pub exists: bool,
    pub executable: bool,
    pub lamports: u64,
}

/// The ledger capabilities the bridge relies on.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    async fn token_account(&self, address: &Pubkey) -> Result<TokenAccountLookup, LedgerError>;

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    async fn submit_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError>;

    /// Every account owned by `program_id`, with its raw data.
    async fn program_accounts(&self, program_id: &Pubkey) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError>;

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, LedgerError>;
}

pub fn token_ui_amount(amount: u64) -> f64 {
    (amount as f64) / (TOKEN_SCALE as f64)
}

/// Parses raw account data owned by `owner_program` as an SPL token account.
pub fn parse_token_account(owner_program: &Pubkey, data: &[u8]) -> TokenAccountLookup {
    if *owner_program != spl_token_program_id() {
        return TokenAccountLookup::NotTokenAccount;
    }
    match TokenAccount::unpack(data) {
        Ok(tok) => TokenAccountLookup::Token(ParsedTokenAccount {
            owner: tok.owner,
            mint: tok.mint,
            amount: tok.amount,
            amount_ui: token_ui_amount(tok.amount),
        }),
        Err(_) => TokenAccountLookup::NotTokenAccount,
    }
}

/// JSON-RPC backed ledger with a bounded timeout on every call.
pub struct RpcLedger {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
    read_timeout: Duration,
    submit_timeout: Duration,
}

impl RpcLedger {
    pub fn new(rpc_url: String, read_timeout: Duration, submit_timeout: Duration) -> Self {
        let commitment = CommitmentConfig::confirmed();
        let rpc = Arc::new(RpcClient::new_with_commitment(rpc_url, commitment));
        Self {
            rpc,
            commitment,
            read_timeout,
            submit_timeout,
        }
    }

    pub fn url(&self) -> String {
        self.rpc.url()
    }

    async fn bounded<T, F>(&self, call: &'static str, after: Duration, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match timeout(after, fut).await {
            Ok(res) => res.map_err(|e| classify(call, e)),
            Err(_) => Err(LedgerError::Timeout { call, after }),
        }
    }

    pub async fn program_status(&self, program_id: &Pubkey) -> Result<ProgramStatus, LedgerError> {
        let resp = self
            .bounded(
                "getAccountInfo",
                self.read_timeout,
                self.rpc.get_account_with_commitment(program_id, self.commitment),
            )
            .await?;
        Ok(match resp.value {
            Some(acc) => ProgramStatus {
                exists: true,
                executable: acc.executable,
                lamports: acc.lamports,
            },
            None => ProgramStatus {
                exists: false,
                executable: false,
                lamports: 0,
            },
        })
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let resp = self
            .bounded(
                "getAccountInfo",
                self.read_timeout,
                self.rpc.get_account_with_commitment(address, self.commitment),
            )
            .await?;
        Ok(resp.value.map(|acc| acc.data))
    }

    async fn token_account(&self, address: &Pubkey) -> Result<TokenAccountLookup, LedgerError> {
        let resp = self
            .bounded(
                "getAccountInfo",
                self.read_timeout,
                self.rpc.get_account_with_commitment(address, self.commitment),
            )
            .await?;
        Ok(match resp.value {
            Some(acc) => parse_token_account(&acc.owner, &acc.data),
            None => TokenAccountLookup::Missing,
        })
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.bounded(
            "getLatestBlockhash",
            self.read_timeout,
            self.rpc.get_latest_blockhash(),
        )
        .await
    }

    async fn submit_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerError> {
        let sig = self
            .bounded(
                SEND_TRANSACTION,
                self.submit_timeout,
                self.rpc.send_and_confirm_transaction(tx),
            )
            .await?;
        debug!(%sig, "transaction confirmed");
        Ok(sig)
    }

    async fn program_accounts(&self, program_id: &Pubkey) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError> {
        let accounts = self
            .bounded(
                "getProgramAccounts",
                self.read_timeout,
                self.rpc.get_program_accounts(program_id),
            )
            .await?;
        Ok(accounts.into_iter().map(|(key, acc)| (key, acc.data)).collect())
    }

    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>, LedgerError> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };
        let statuses = self
            .bounded(
                "getSignaturesForAddress",
                self.read_timeout,
                self.rpc.get_signatures_for_address_with_config(address, config),
            )
            .await?;
        Ok(statuses
            .into_iter()
            .map(|s| SignatureRecord {
                signature: s.signature,
                slot: s.slot,
                block_time: s.block_time,
                err: s.err.map(|e| e.to_string()),
                memo: s.memo,
            })
            .collect())
    }
}

const SEND_TRANSACTION: &str = "sendTransaction";

/// Only the submit path can be rejected; node errors on reads are transient.
fn classify(call: &'static str, err: ClientError) -> LedgerError {
    let msg = err.to_string();
    match err.kind() {
        ClientErrorKind::TransactionError(_) | ClientErrorKind::SigningError(_) => {
            LedgerError::Rejected(msg)
        }
        ClientErrorKind::RpcError(_) if call == SEND_TRANSACTION => LedgerError::Rejected(msg),
        _ => LedgerError::Unavailable(msg),
    }
}
