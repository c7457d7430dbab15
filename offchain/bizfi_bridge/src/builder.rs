use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    system_program, sysvar,
    transaction::Transaction,
};
use spl_associated_token_account::instruction as ata_ix;
use spl_token::id as spl_token_program_id;
use tracing::{debug, info};

use crate::{
    codec::{encode_initialize_market, encode_place_bet, BetSide, InitializeMarketArgs, TokenTransfer},
    error::{BridgeError, ConfigError},
    ledger::Ledger,
    protocol::{associated_token_address, AddressDeriver, AddressKind},
};

/// Creation fee charged on every new market; zero disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub amount: u64,
    pub collector: Option<Pubkey>,
}

impl FeePolicy {
    pub fn new(amount: u64, collector: Option<Pubkey>) -> Self {
        Self { amount, collector }
    }

    pub fn none() -> Self {
        Self {
            amount: 0,
            collector: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    /// base64 bincode, signature slots empty
    pub transaction: String,
    /// the market (or position) the transaction targets
    pub address: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAta {
    pub transaction: String,
    pub ata: Pubkey,
    pub already_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeMarketParams {
    pub market_id: u64,
    pub creator: Pubkey,
    pub creator_usdc_ata: Pubkey,
    pub usdc_mint: Pubkey,
    pub question: String,
    pub duration: i64,
}

/// Assembles unsigned transactions with the user as fee payer.
#[derive(Clone)]
pub struct TransactionBuilder {
    deriver: AddressDeriver,
    ledger: Arc<dyn Ledger>,
    fee: FeePolicy,
}

impl TransactionBuilder {
    pub fn new(deriver: AddressDeriver, ledger: Arc<dyn Ledger>, fee: FeePolicy) -> Self {
        Self {
            deriver,
            ledger,
            fee,
        }
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fee
    }

    pub async fn build_place_bet(
        &self,
        market_id: u64,
        user: &Pubkey,
        user_usdc_ata: &Pubkey,
        amount: u64,
        side: BetSide,
    ) -> Result<PreparedTransaction, BridgeError> {
        if market_id == 0 {
            return Err(BridgeError::InvalidInput("market id must be positive".into()));
        }
        if amount == 0 {
            return Err(BridgeError::InvalidInput("bet amount must be positive".into()));
        }
        let addrs = self.deriver.market_addresses(market_id);
        let (position, _) = self.deriver.derive(AddressKind::UserPosition(*user), market_id);
        let data = encode_place_bet(amount, side).map_err(|e| BridgeError::InvalidInput(e.to_string()))?;

        let ix = Instruction {
            program_id: *self.deriver.program_id(),
            accounts: vec![
                AccountMeta::new(addrs.market, false),
                AccountMeta::new(*user, true),
                AccountMeta::new(*user_usdc_ata, false),
                AccountMeta::new_readonly(addrs.vault_authority, false),
                AccountMeta::new(addrs.vault, false),
                AccountMeta::new(position, false),
                AccountMeta::new_readonly(spl_token_program_id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
            ],
            data,
        };

        let transaction = self.unsigned(&[ix], user).await?;
        debug!(market_id, user = %user, amount, ?side, "prepared place_bet");
        Ok(PreparedTransaction {
            transaction,
            address: addrs.market,
        })
    }

    pub async fn build_initialize_market(
        &self,
        params: &InitializeMarketParams,
    ) -> Result<PreparedTransaction, BridgeError> {
        if params.market_id == 0 {
            return Err(BridgeError::InvalidInput("market id must be positive".into()));
        }
        if params.duration <= 0 {
            return Err(BridgeError::InvalidInput("duration must be positive".into()));
        }
        let addrs = self.deriver.market_addresses(params.market_id);

        if self.ledger.account_bytes(&addrs.market).await?.is_some() {
            return Err(BridgeError::InvalidInput(format!(
                "market {} already exists at {}",
                params.market_id, addrs.market
            )));
        }

        let mut ixs = Vec::with_capacity(2);
        if self.fee.amount > 0 {
            let collector = self
                .fee
                .collector
                .ok_or(ConfigError::Missing("MARKET_FEE_COLLECTOR_ATA"))?;
            let fee = TokenTransfer {
                source: params.creator_usdc_ata,
                destination: collector,
                authority: params.creator,
                amount: self.fee.amount,
            };
            ixs.push(fee.instruction().map_err(|e| BridgeError::InvalidInput(e.to_string()))?);
        }

        let data = encode_initialize_market(&InitializeMarketArgs {
            market_id: params.market_id,
            question: params.question.clone(),
            duration: params.duration,
        })
        .map_err(|e| BridgeError::InvalidInput(e.to_string()))?;
        ixs.push(Instruction {
            program_id: *self.deriver.program_id(),
            accounts: vec![
                AccountMeta::new(addrs.market, false),
                AccountMeta::new_readonly(addrs.vault_authority, false),
                AccountMeta::new(addrs.vault, false),
                AccountMeta::new_readonly(params.usdc_mint, false),
                AccountMeta::new(params.creator, true),
                AccountMeta::new_readonly(spl_token_program_id(), false),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new_readonly(sysvar::rent::id(), false),
            ],
            data,
        });

        let transaction = self.unsigned(&ixs, &params.creator).await?;
        info!(
            market_id = params.market_id,
            market = %addrs.market,
            creator = %params.creator,
            fee = self.fee.amount,
            "prepared initialize_market"
        );
        Ok(PreparedTransaction {
            transaction,
            address: addrs.market,
        })
    }

    pub async fn build_create_ata(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<PreparedAta, BridgeError> {
        let ata = associated_token_address(owner, mint);
        if self.ledger.account_bytes(&ata).await?.is_some() {
            return Ok(PreparedAta {
                transaction: String::new(),
                ata,
                already_exists: true,
            });
        }
        let ix = ata_ix::create_associated_token_account(owner, owner, mint, &spl_token_program_id());
        let transaction = self.unsigned(&[ix], owner).await?;
        debug!(owner = %owner, ata = %ata, "prepared create_ata");
        Ok(PreparedAta {
            transaction,
            ata,
            already_exists: false,
        })
    }

    async fn unsigned(&self, ixs: &[Instruction], payer: &Pubkey) -> Result<String, BridgeError> {
        let blockhash = self.ledger.latest_blockhash().await?;
        let message = Message::new_with_blockhash(ixs, Some(payer), &blockhash);
        let tx = Transaction::new_unsigned(message);
        let bytes = bincode::serialize(&tx)
            .map_err(|e| BridgeError::InvalidInput(format!("transaction encoding failed: {e}")))?;
        Ok(STANDARD.encode(bytes))
    }
}
