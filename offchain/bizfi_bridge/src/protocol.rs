// offchain/bizfi_bridge/src/protocol.rs
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;

/// Seeds must match the on-chain `bizfi_market` program.
pub const MARKET_SEED: &[u8] = b"market";
pub const VAULT_AUTHORITY_SEED: &[u8] = b"vault_authority";
pub const VAULT_SEED: &[u8] = b"vault";
pub const POSITION_SEED: &[u8] = b"position";

pub const TOKEN_SCALE: u64 = 1_000_000; // settlement token has 6 decimals

pub const DEFAULT_PROGRAM_ID: &str = "5JUtUiusEUzwgub1LTztjGJ1h2krpzqBaVfQrEHHwJbr";

/// The protocol accounts that live at program-derived addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Market,
    VaultAuthority,
    Vault,
    UserPosition(Pubkey),
}

impl AddressKind {
    pub fn seed(&self) -> &'static [u8] {
        match self {
            AddressKind::Market => MARKET_SEED,
            AddressKind::VaultAuthority => VAULT_AUTHORITY_SEED,
            AddressKind::Vault => VAULT_SEED,
            AddressKind::UserPosition(_) => POSITION_SEED,
        }
    }
}

/// Every account address a single market touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketAddresses {
    pub market: Pubkey,
    pub vault_authority: Pubkey,
    pub vault: Pubkey,
}

/// Deterministic address derivation for one deployed program id.
#[derive(Debug, Clone, Copy)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// tag ‖ market_id (u64 LE) ‖ optional user bytes, searched for a valid bump.
    pub fn derive(&self, kind: AddressKind, market_id: u64) -> (Pubkey, u8) {
        let id_bytes = market_id.to_le_bytes();
        match kind {
            AddressKind::UserPosition(user) => Pubkey::find_program_address(
                &[kind.seed(), &id_bytes, user.as_ref()],
                &self.program_id,
            ),
            _ => Pubkey::find_program_address(&[kind.seed(), &id_bytes], &self.program_id),
        }
    }

    pub fn market(&self, market_id: u64) -> Pubkey {
        self.derive(AddressKind::Market, market_id).0
    }

    pub fn user_position(&self, market_id: u64, user: &Pubkey) -> Pubkey {
        self.derive(AddressKind::UserPosition(*user), market_id).0
    }

    pub fn market_addresses(&self, market_id: u64) -> MarketAddresses {
        MarketAddresses {
            market: self.market(market_id),
            vault_authority: self.derive(AddressKind::VaultAuthority, market_id).0,
            vault: self.derive(AddressKind::Vault, market_id).0,
        }
    }
}

/// Associated token account for (owner, mint) under the classic token program.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(owner, mint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn deriver() -> AddressDeriver {
        AddressDeriver::new(Pubkey::from_str(DEFAULT_PROGRAM_ID).unwrap())
    }

    #[test]
    fn derivation_is_deterministic() {
        let d = deriver();
        let user = Pubkey::new_unique();
        for id in [1u64, 42, u64::MAX] {
            assert_eq!(d.derive(AddressKind::Market, id), d.derive(AddressKind::Market, id));
            assert_eq!(
                d.derive(AddressKind::UserPosition(user), id),
                d.derive(AddressKind::UserPosition(user), id)
            );
        }
    }

    #[test]
    fn kinds_never_collide_for_one_market() {
        let d = deriver();
        let user = Pubkey::new_unique();
        for id in [1u64, 7, 1_000_000] {
            let addrs = [
                d.derive(AddressKind::Market, id).0,
                d.derive(AddressKind::VaultAuthority, id).0,
                d.derive(AddressKind::Vault, id).0,
                d.derive(AddressKind::UserPosition(user), id).0,
            ];
            for i in 0..addrs.len() {
                for j in (i + 1)..addrs.len() {
                    assert_ne!(addrs[i], addrs[j], "kinds {i} and {j} collide for market {id}");
                }
            }
        }
    }

    #[test]
    fn matches_manual_seed_layout() {
        let d = deriver();
        let expected =
            Pubkey::find_program_address(&[b"market", &9u64.to_le_bytes()], d.program_id());
        assert_eq!(d.derive(AddressKind::Market, 9), expected);
    }

    #[test]
    fn positions_differ_per_user() {
        let d = deriver();
        assert_ne!(
            d.user_position(3, &Pubkey::new_unique()),
            d.user_position(3, &Pubkey::new_unique())
        );
    }
}
