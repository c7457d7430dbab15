use std::sync::Arc;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::debug;

use crate::{
    error::BridgeError,
    ledger::{Ledger, ParsedTokenAccount, TokenAccountLookup},
};

/// Observed vs expected token-account fields, base-58 encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAccountDetails {
    pub account: String,
    pub owner: String,
    pub mint: String,
    pub expected_owner: String,
    pub expected_mint: String,
    pub amount_ui: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PrecheckFailure {
    #[error("Token account {0} not found")]
    NotFound(String),
    #[error("Provided token account is not a valid SPL token account")]
    NotTokenAccount(String),
    #[error("Invalid token owner: ATA owner does not match submitting wallet")]
    OwnerMismatch(TokenAccountDetails),
    #[error("Invalid token mint: ATA mint does not match required mint")]
    MintMismatch(TokenAccountDetails),
}

impl PrecheckFailure {
    pub fn details(&self) -> Option<&TokenAccountDetails> {
        match self {
            PrecheckFailure::OwnerMismatch(d) | PrecheckFailure::MintMismatch(d) => Some(d),
            _ => None,
        }
    }
}

/// Confirms a token account exists, is SPL, and has the expected owner and mint.
/// Reads the ledger on every call.
#[derive(Clone)]
pub struct TokenAccountPrecheck {
    ledger: Arc<dyn Ledger>,
}

impl TokenAccountPrecheck {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn precheck(
        &self,
        account: &Pubkey,
        expected_owner: &Pubkey,
        expected_mint: &Pubkey,
    ) -> Result<TokenAccountDetails, BridgeError> {
        let parsed: ParsedTokenAccount = match self.ledger.token_account(account).await? {
            TokenAccountLookup::Missing => {
                return Err(PrecheckFailure::NotFound(account.to_string()).into())
            }
            TokenAccountLookup::NotTokenAccount => {
                return Err(PrecheckFailure::NotTokenAccount(account.to_string()).into())
            }
            TokenAccountLookup::Token(parsed) => parsed,
        };

        let details = TokenAccountDetails {
            account: account.to_string(),
            owner: parsed.owner.to_string(),
            mint: parsed.mint.to_string(),
            expected_owner: expected_owner.to_string(),
            expected_mint: expected_mint.to_string(),
            amount_ui: parsed.amount_ui,
        };
        if parsed.owner != *expected_owner {
            debug!(account = %account, owner = %parsed.owner, "token account owner mismatch");
            return Err(PrecheckFailure::OwnerMismatch(details).into());
        }
        if parsed.mint != *expected_mint {
            debug!(account = %account, mint = %parsed.mint, "token account mint mismatch");
            return Err(PrecheckFailure::MintMismatch(details).into());
        }
        Ok(details)
    }
}
