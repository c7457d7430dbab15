use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::codec::{account_discriminator, DISCRIMINATOR_LEN};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("account data too short ({0} bytes)")]
    TooShort(usize),
    #[error("account data matches none of the schemas {0:?}")]
    NoMatchingSchema(Vec<String>),
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Resolved,
    Disputed,
}

/// Layout MUST match the on-chain `Market` account (after the 8-byte discriminator).
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MarketRecord {
    pub market_id: u64,
    pub creator: [u8; 32],
    pub question: String,
    pub end_time: i64,
    pub status: MarketStatus,
    pub total_pool: u64,
    pub yes_pool: u64,
    pub no_pool: u64,
    pub outcome: bool,
    pub usdc_mint: [u8; 32],
    pub market_bump: u8,
    pub vault_bump: u8,
    pub vault_authority_bump: u8,
}

/// Layout MUST match the on-chain `UserPosition` account.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserPositionRecord {
    pub user: [u8; 32],
    pub market: [u8; 32],
    pub yes_amount: u64,
    pub no_amount: u64,
    pub claimed: bool,
    pub bump: u8,
}

/// A decoded market with derived odds and time remaining, valid as of `now`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub address: String,
    pub market_id: u64,
    pub creator: String,
    pub usdc_mint: String,
    pub question: String,
    pub end_time: i64,
    pub status: MarketStatus,
    pub is_active: bool,
    pub total_pool: u64,
    pub yes_pool: u64,
    pub no_pool: u64,
    pub yes_odds: f64,
    pub no_odds: f64,
    pub outcome: bool,
    pub time_remaining: i64,
}

impl MarketSnapshot {
    pub fn from_record(record: MarketRecord, address: &Pubkey, now: i64) -> Self {
        let (yes_odds, no_odds) = if record.total_pool > 0 {
            let total = record.total_pool as f64;
            (record.yes_pool as f64 / total, record.no_pool as f64 / total)
        } else {
            (0.5, 0.5)
        };
        Self {
            address: address.to_string(),
            market_id: record.market_id,
            creator: Pubkey::new_from_array(record.creator).to_string(),
            usdc_mint: Pubkey::new_from_array(record.usdc_mint).to_string(),
            question: record.question,
            end_time: record.end_time,
            status: record.status,
            is_active: record.status == MarketStatus::Active,
            total_pool: record.total_pool,
            yes_pool: record.yes_pool,
            no_pool: record.no_pool,
            yes_odds,
            no_odds,
            outcome: record.outcome,
            time_remaining: record.end_time.saturating_sub(now).max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPositionSnapshot {
    pub user: String,
    pub market: String,
    pub yes_amount: u64,
    pub no_amount: u64,
    pub claimed: bool,
    pub bump: u8,
}

impl From<UserPositionRecord> for UserPositionSnapshot {
    fn from(raw: UserPositionRecord) -> Self {
        Self {
            user: Pubkey::new_from_array(raw.user).to_string(),
            market: Pubkey::new_from_array(raw.market).to_string(),
            yes_amount: raw.yes_amount,
            no_amount: raw.no_amount,
            claimed: raw.claimed,
            bump: raw.bump,
        }
    }
}

/// Tries each candidate schema name in order; trailing account padding is ignored.
pub fn decode_with_schemas<T: BorshDeserialize>(
    names: &[String],
    data: &[u8],
) -> Result<T, DecodeError> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(DecodeError::TooShort(data.len()));
    }
    let (disc, body) = data.split_at(DISCRIMINATOR_LEN);
    for name in names {
        if disc != account_discriminator(name).as_slice() {
            continue;
        }
        let mut cursor = body;
        if let Ok(record) = T::deserialize(&mut cursor) {
            return Ok(record);
        }
    }
    Err(DecodeError::NoMatchingSchema(names.to_vec()))
}

pub fn decode_market(
    names: &[String],
    data: &[u8],
    address: &Pubkey,
    now: i64,
) -> Result<MarketSnapshot, DecodeError> {
    let record: MarketRecord = decode_with_schemas(names, data)?;
    Ok(MarketSnapshot::from_record(record, address, now))
}

pub fn decode_user_position(
    names: &[String],
    data: &[u8],
) -> Result<UserPositionSnapshot, DecodeError> {
    decode_with_schemas::<UserPositionRecord>(names, data).map(Into::into)
}

/// Account bytes as the program would store them, for tests and tooling.
pub fn encode_account<T: BorshSerialize>(schema_name: &str, record: &T) -> std::io::Result<Vec<u8>> {
    let mut data = account_discriminator(schema_name).to_vec();
    record.serialize(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ProtocolInterface;

    fn record(yes: u64, no: u64) -> MarketRecord {
        MarketRecord {
            market_id: 5,
            creator: Pubkey::new_unique().to_bytes(),
            question: "Will the MVP ship before Q2 2026?".into(),
            end_time: 10_000,
            status: MarketStatus::Active,
            total_pool: yes + no,
            yes_pool: yes,
            no_pool: no,
            outcome: false,
            usdc_mint: Pubkey::new_unique().to_bytes(),
            market_bump: 255,
            vault_bump: 254,
            vault_authority_bump: 253,
        }
    }

    #[test]
    fn decodes_market_with_derived_fields() {
        let iface = ProtocolInterface::builtin();
        let raw = record(750_000, 250_000);
        let mut data = encode_account("Market", &raw).unwrap();
        data.resize(data.len() + 64, 0); // unused question capacity
        let address = Pubkey::new_unique();
        let snap = decode_market(&iface.market_names, &data, &address, 4_000).unwrap();
        assert_eq!(snap.address, address.to_string());
        assert_eq!(snap.creator, Pubkey::new_from_array(raw.creator).to_string());
        assert_eq!(snap.yes_odds, 0.75);
        assert_eq!(snap.no_odds, 0.25);
        assert_eq!(snap.time_remaining, 6_000);
        assert!(snap.is_active);
    }

    #[test]
    fn empty_pool_has_even_odds_and_expired_market_clamps() {
        let iface = ProtocolInterface::builtin();
        let data = encode_account("Market", &record(0, 0)).unwrap();
        let snap = decode_market(&iface.market_names, &data, &Pubkey::new_unique(), 20_000).unwrap();
        assert_eq!((snap.yes_odds, snap.no_odds), (0.5, 0.5));
        assert_eq!(snap.time_remaining, 0);
    }

    #[test]
    fn extreme_end_time_does_not_overflow() {
        let mut raw = record(1, 1);
        raw.end_time = i64::MIN;
        let snap = MarketSnapshot::from_record(raw.clone(), &Pubkey::new_unique(), 1_700_000_000);
        assert_eq!(snap.time_remaining, 0);

        raw.end_time = i64::MAX;
        let snap = MarketSnapshot::from_record(raw, &Pubkey::new_unique(), -1);
        assert_eq!(snap.time_remaining, i64::MAX);
    }

    #[test]
    fn falls_back_to_alternate_casing() {
        let iface = ProtocolInterface::builtin();
        let data = encode_account("market", &record(1, 1)).unwrap();
        assert!(decode_market(&iface.market_names, &data, &Pubkey::new_unique(), 0).is_ok());
    }

    #[test]
    fn rejects_unknown_discriminator_and_truncated_body() {
        let iface = ProtocolInterface::builtin();
        let data = encode_account("Pool", &record(1, 1)).unwrap();
        assert!(matches!(
            decode_market(&iface.market_names, &data, &Pubkey::new_unique(), 0),
            Err(DecodeError::NoMatchingSchema(_))
        ));
        let data = encode_account("Market", &record(1, 1)).unwrap();
        assert!(decode_market(&iface.market_names, &data[..30], &Pubkey::new_unique(), 0).is_err());
        assert_eq!(
            decode_market(&iface.market_names, &data[..4], &Pubkey::new_unique(), 0),
            Err(DecodeError::TooShort(4))
        );
    }

    #[test]
    fn decodes_user_position() {
        let iface = ProtocolInterface::builtin();
        let raw = UserPositionRecord {
            user: Pubkey::new_unique().to_bytes(),
            market: Pubkey::new_unique().to_bytes(),
            yes_amount: 3,
            no_amount: 0,
            claimed: false,
            bump: 250,
        };
        let data = encode_account("UserPosition", &raw).unwrap();
        let snap = decode_user_position(&iface.position_names, &data).unwrap();
        assert_eq!(snap.yes_amount, 3);
        assert_eq!(snap.user, Pubkey::new_from_array(raw.user).to_string());
    }
}
