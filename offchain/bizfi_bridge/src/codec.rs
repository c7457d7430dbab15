use borsh::{BorshDeserialize, BorshSerialize};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use spl_token::{id as spl_token_program_id, instruction as token_instruction};
use thiserror::Error;

pub const DISCRIMINATOR_LEN: usize = 8;

/// TokenInstruction::Transfer
pub const TOKEN_TRANSFER_TAG: u8 = 3;
const TOKEN_TRANSFER_LEN: usize = 1 + 8;

pub const PLACE_BET: &str = "place_bet";
pub const INITIALIZE_MARKET: &str = "initialize_market";

// disc + amount u64 + bet_on_yes bool
const PLACE_BET_MIN_LEN: usize = DISCRIMINATOR_LEN + 8 + 1;
// disc + market_id u64 + empty question (u32 len) + duration i64
const INITIALIZE_MARKET_MIN_LEN: usize = DISCRIMINATOR_LEN + 8 + 4 + 8;

static PLACE_BET_DISC: Lazy<[u8; 8]> = Lazy::new(|| instruction_discriminator(PLACE_BET));
static INITIALIZE_MARKET_DISC: Lazy<[u8; 8]> =
    Lazy::new(|| instruction_discriminator(INITIALIZE_MARKET));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Instruction data too short for {op}")]
    TooShort { op: &'static str, need: usize, got: usize },
    #[error("Program instruction is not {op}")]
    WrongDiscriminator { op: &'static str },
    #[error("Decoded {op} amount is invalid")]
    InvalidAmount { op: &'static str },
    #[error("Malformed {op} arguments: {reason}")]
    Malformed { op: &'static str, reason: String },
    #[error("failed to encode {op}: {reason}")]
    Encode { op: &'static str, reason: String },
}

fn sha256_prefix(preimage: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(preimage.as_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// sha256("global:<name>")[..8]
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    sha256_prefix(&format!("global:{name}"))
}

/// sha256("account:<Name>")[..8]
pub fn account_discriminator(name: &str) -> [u8; 8] {
    sha256_prefix(&format!("account:{name}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetSide {
    Yes,
    No,
}

impl BetSide {
    pub fn from_yes(bet_on_yes: bool) -> Self {
        if bet_on_yes {
            BetSide::Yes
        } else {
            BetSide::No
        }
    }

    pub fn is_yes(self) -> bool {
        matches!(self, BetSide::Yes)
    }
}

/// The argument layout MUST match the on-chain `place_bet` handler.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlaceBetArgs {
    pub amount: u64,
    pub bet_on_yes: bool,
}

impl PlaceBetArgs {
    pub fn side(&self) -> BetSide {
        BetSide::from_yes(self.bet_on_yes)
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitializeMarketArgs {
    pub market_id: u64,
    pub question: String,
    pub duration: i64,
}

fn encode_with_disc<T: BorshSerialize>(
    op: &'static str,
    disc: &[u8; 8],
    args: &T,
) -> Result<Vec<u8>, CodecError> {
    let mut data = Vec::with_capacity(DISCRIMINATOR_LEN + 32);
    data.extend_from_slice(disc);
    args.serialize(&mut data).map_err(|e| CodecError::Encode {
        op,
        reason: e.to_string(),
    })?;
    Ok(data)
}

fn check_header(
    op: &'static str,
    data: &[u8],
    disc: &[u8; 8],
    min_len: usize,
) -> Result<(), CodecError> {
    if data.len() < min_len {
        return Err(CodecError::TooShort {
            op,
            need: min_len,
            got: data.len(),
        });
    }
    if &data[..DISCRIMINATOR_LEN] != disc {
        return Err(CodecError::WrongDiscriminator { op });
    }
    Ok(())
}

pub fn encode_place_bet(amount: u64, side: BetSide) -> Result<Vec<u8>, CodecError> {
    let args = PlaceBetArgs {
        amount,
        bet_on_yes: side.is_yes(),
    };
    encode_with_disc(PLACE_BET, &PLACE_BET_DISC, &args)
}

pub fn decode_place_bet(data: &[u8]) -> Result<PlaceBetArgs, CodecError> {
    check_header(PLACE_BET, data, &PLACE_BET_DISC, PLACE_BET_MIN_LEN)?;
    let mut rest = &data[DISCRIMINATOR_LEN..];
    let args = PlaceBetArgs::deserialize(&mut rest).map_err(|e| CodecError::Malformed {
        op: PLACE_BET,
        reason: e.to_string(),
    })?;
    if args.amount == 0 {
        return Err(CodecError::InvalidAmount { op: PLACE_BET });
    }
    Ok(args)
}

pub fn encode_initialize_market(args: &InitializeMarketArgs) -> Result<Vec<u8>, CodecError> {
    encode_with_disc(INITIALIZE_MARKET, &INITIALIZE_MARKET_DISC, args)
}

pub fn decode_initialize_market(data: &[u8]) -> Result<InitializeMarketArgs, CodecError> {
    check_header(
        INITIALIZE_MARKET,
        data,
        &INITIALIZE_MARKET_DISC,
        INITIALIZE_MARKET_MIN_LEN,
    )?;
    let mut rest = &data[DISCRIMINATOR_LEN..];
    let args =
        InitializeMarketArgs::deserialize(&mut rest).map_err(|e| CodecError::Malformed {
            op: INITIALIZE_MARKET,
            reason: e.to_string(),
        })?;
    if args.market_id == 0 || args.duration <= 0 {
        return Err(CodecError::InvalidAmount {
            op: INITIALIZE_MARKET,
        });
    }
    Ok(args)
}

/// An SPL token `Transfer` found in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub source: Pubkey,
    pub destination: Pubkey,
    pub authority: Pubkey,
    pub amount: u64,
}

impl TokenTransfer {
    pub fn instruction(&self) -> Result<Instruction, CodecError> {
        token_instruction::transfer(
            &spl_token_program_id(),
            &self.source,
            &self.destination,
            &self.authority,
            &[],
            self.amount,
        )
        .map_err(|e| CodecError::Encode {
            op: "token transfer",
            reason: e.to_string(),
        })
    }

    /// Recognizes tag 3 + u64 LE amount with source/destination/authority accounts.
    pub fn recognize(program_id: &Pubkey, accounts: &[Pubkey], data: &[u8]) -> Option<Self> {
        if *program_id != spl_token_program_id() || data.len() < TOKEN_TRANSFER_LEN {
            return None;
        }
        if data[0] != TOKEN_TRANSFER_TAG {
            return None;
        }
        let mut amount_bytes = [0u8; 8];
        amount_bytes.copy_from_slice(&data[1..TOKEN_TRANSFER_LEN]);
        match accounts {
            [source, destination, authority, ..] => Some(Self {
                source: *source,
                destination: *destination,
                authority: *authority,
                amount: u64::from_le_bytes(amount_bytes),
            }),
            _ => None,
        }
    }
}
