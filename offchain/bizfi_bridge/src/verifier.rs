use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    instruction::CompiledInstruction, message::Message, packet::PACKET_DATA_SIZE, pubkey::Pubkey,
    sanitize::Sanitize, signature::Signature, transaction::Transaction,
};
use thiserror::Error;

use crate::{
    builder::FeePolicy,
    codec::{decode_initialize_market, decode_place_bet, BetSide, CodecError, TokenTransfer},
    protocol::{associated_token_address, AddressDeriver},
};

const MAX_ENCODED_LEN: usize = (PACKET_DATA_SIZE + 2) / 3 * 4;

pub const PLACE_BET_ACCOUNTS: usize = 9;
pub const INITIALIZE_MARKET_ACCOUNTS: usize = 8;

// account positions inside the program instructions
const BET_MARKET: usize = 0;
const BET_USER: usize = 1;
const BET_USER_TOKEN: usize = 2;
const INIT_MARKET: usize = 0;
const INIT_MINT: usize = 3;
const INIT_CREATOR: usize = 4;
const ATA_ADDRESS: usize = 1;
const ATA_WALLET: usize = 2;
const ATA_MINT: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Invalid signed transaction payload")]
    InvalidPayload,
    #[error("Fee payer does not match submitting wallet")]
    FeePayerMismatch,
    #[error("Submitting wallet signature is missing")]
    SignatureMissing,
    #[error("No instruction found for configured program ID")]
    NoProgramInstruction,
    #[error("Transaction contains {0} instructions for configured program ID; expected exactly one")]
    MultipleProgramInstructions(usize),
    #[error("Program instruction has {got} accounts; {need} required")]
    MissingAccounts { need: usize, got: usize },
    #[error("Program instruction {role} account {found} does not match expected {expected}")]
    AccountMismatch {
        role: &'static str,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Missing required creation fee transfer to collector ATA")]
    MissingFeeTransfer,
    #[error("No valid associated token account creation instruction found")]
    NoAtaCreation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBet {
    pub amount: u64,
    pub side: BetSide,
    pub market_address: Pubkey,
    pub user_usdc_ata: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMarketCreation {
    pub market_address: Pubkey,
    pub market_id: u64,
    pub question: String,
    pub duration: i64,
    pub usdc_mint: Pubkey,
    /// Source of the creation fee, when one is charged.
    pub creator_usdc_ata: Option<Pubkey>,
    pub fee_amount: u64,
}

/// base64 -> bincode legacy transaction, structurally sanitized.
pub fn decode_signed(encoded: &str) -> Result<Transaction, VerifyError> {
    let encoded = encoded.trim();
    if encoded.is_empty() || encoded.len() > MAX_ENCODED_LEN {
        return Err(VerifyError::InvalidPayload);
    }
    let raw = STANDARD
        .decode(encoded)
        .map_err(|_| VerifyError::InvalidPayload)?;
    let tx: Transaction = bincode::deserialize(&raw).map_err(|_| VerifyError::InvalidPayload)?;
    tx.sanitize().map_err(|_| VerifyError::InvalidPayload)?;
    Ok(tx)
}

/// Checks client-signed transactions against what the bridge prepared.
/// Verification is read-only; the same transaction always yields the same result.
#[derive(Debug, Clone)]
pub struct TransactionVerifier {
    deriver: AddressDeriver,
    fee: FeePolicy,
}

impl TransactionVerifier {
    pub fn new(deriver: AddressDeriver, fee: FeePolicy) -> Self {
        Self { deriver, fee }
    }

    pub fn verify_place_bet(
        &self,
        tx: &Transaction,
        user: &Pubkey,
    ) -> Result<VerifiedBet, VerifyError> {
        check_signer(tx, user)?;
        let (ix, accounts) = self.program_instruction(&tx.message)?;
        let args = decode_place_bet(&ix.data)?;
        require_accounts(&accounts, PLACE_BET_ACCOUNTS)?;
        expect_account("user", &accounts[BET_USER], user)?;

        Ok(VerifiedBet {
            amount: args.amount,
            side: args.side(),
            market_address: accounts[BET_MARKET],
            user_usdc_ata: accounts[BET_USER_TOKEN],
        })
    }

    pub fn verify_initialize_market(
        &self,
        tx: &Transaction,
        creator: &Pubkey,
    ) -> Result<VerifiedMarketCreation, VerifyError> {
        check_signer(tx, creator)?;
        let (ix, accounts) = self.program_instruction(&tx.message)?;
        let args = decode_initialize_market(&ix.data)?;
        require_accounts(&accounts, INITIALIZE_MARKET_ACCOUNTS)?;
        expect_account("creator", &accounts[INIT_CREATOR], creator)?;

        let market_address = self.deriver.market(args.market_id);
        expect_account("market", &accounts[INIT_MARKET], &market_address)?;

        let (creator_usdc_ata, fee_amount) = if self.fee.amount > 0 {
            let transfer = self.find_fee_transfer(&tx.message, creator)?;
            (Some(transfer.source), transfer.amount)
        } else {
            (None, 0)
        };

        Ok(VerifiedMarketCreation {
            market_address,
            market_id: args.market_id,
            question: args.question,
            duration: args.duration,
            usdc_mint: accounts[INIT_MINT],
            creator_usdc_ata,
            fee_amount,
        })
    }

    pub fn verify_create_ata(
        &self,
        tx: &Transaction,
        user: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Pubkey, VerifyError> {
        check_signer(tx, user)?;
        let ata = associated_token_address(user, mint);
        let ata_program = spl_associated_token_account::id();
        let found = tx.message.instructions.iter().any(|ix| {
            if ix_program(&tx.message, ix) != Some(ata_program) {
                return false;
            }
            // Create (empty or 0) and CreateIdempotent (1)
            if !matches!(ix.data.as_slice(), [] | [0] | [1]) {
                return false;
            }
            match resolve_accounts(&tx.message, ix) {
                Some(keys) if keys.len() > ATA_MINT => {
                    keys[ATA_ADDRESS] == ata && keys[ATA_WALLET] == *user && keys[ATA_MINT] == *mint
                }
                _ => false,
            }
        });
        if found {
            Ok(ata)
        } else {
            Err(VerifyError::NoAtaCreation)
        }
    }

    fn program_instruction<'a>(
        &self,
        message: &'a Message,
    ) -> Result<(&'a CompiledInstruction, Vec<Pubkey>), VerifyError> {
        let program_id = *self.deriver.program_id();
        let mut matching = message
            .instructions
            .iter()
            .filter(|ix| ix_program(message, ix) == Some(program_id));
        let first = matching.next().ok_or(VerifyError::NoProgramInstruction)?;
        let extra = matching.count();
        if extra > 0 {
            return Err(VerifyError::MultipleProgramInstructions(extra + 1));
        }
        let accounts = resolve_accounts(message, first).ok_or(VerifyError::InvalidPayload)?;
        Ok((first, accounts))
    }

    fn find_fee_transfer(
        &self,
        message: &Message,
        payer: &Pubkey,
    ) -> Result<TokenTransfer, VerifyError> {
        let collector = self.fee.collector.ok_or(VerifyError::MissingFeeTransfer)?;
        message
            .instructions
            .iter()
            .filter_map(|ix| {
                let program = ix_program(message, ix)?;
                let keys = resolve_accounts(message, ix)?;
                TokenTransfer::recognize(&program, &keys, &ix.data)
            })
            .find(|t| {
                t.destination == collector
                    && t.authority == *payer
                    && t.amount >= self.fee.amount
                    && t.source != t.destination
            })
            .ok_or(VerifyError::MissingFeeTransfer)
    }
}

fn check_signer(tx: &Transaction, expected: &Pubkey) -> Result<(), VerifyError> {
    let keys = &tx.message.account_keys;
    if keys.first() != Some(expected) {
        return Err(VerifyError::FeePayerMismatch);
    }
    // fee payer sits at index 0 of the signature slots
    match tx.signatures.first() {
        Some(sig) if *sig != Signature::default() => Ok(()),
        _ => Err(VerifyError::SignatureMissing),
    }
}

fn ix_program(message: &Message, ix: &CompiledInstruction) -> Option<Pubkey> {
    message
        .account_keys
        .get(usize::from(ix.program_id_index))
        .copied()
}

fn resolve_accounts(message: &Message, ix: &CompiledInstruction) -> Option<Vec<Pubkey>> {
    ix.accounts
        .iter()
        .map(|&i| message.account_keys.get(usize::from(i)).copied())
        .collect()
}

fn require_accounts(accounts: &[Pubkey], need: usize) -> Result<(), VerifyError> {
    if accounts.len() < need {
        return Err(VerifyError::MissingAccounts {
            need,
            got: accounts.len(),
        });
    }
    Ok(())
}

fn expect_account(role: &'static str, found: &Pubkey, expected: &Pubkey) -> Result<(), VerifyError> {
    if found != expected {
        return Err(VerifyError::AccountMismatch {
            role,
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}
