use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::{
    accounts::{decode_user_position, decode_with_schemas, MarketRecord, MarketSnapshot, UserPositionSnapshot},
    clock::Clock,
    error::BridgeError,
    interface::ProtocolInterface,
    ledger::Ledger,
    protocol::{AddressDeriver, AddressKind},
};

/// Reads protocol accounts. An unusable interface description leaves the
/// reader degraded: every read fails until restart, and the cause is logged once.
pub struct MarketReader {
    deriver: AddressDeriver,
    ledger: Arc<dyn Ledger>,
    interface: Result<ProtocolInterface, String>,
    warned: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MarketReader {
    pub fn new(
        deriver: AddressDeriver,
        ledger: Arc<dyn Ledger>,
        interface: Result<ProtocolInterface, String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            deriver,
            ledger,
            interface,
            warned: AtomicBool::new(false),
            clock,
        }
    }

    fn interface(&self) -> Result<&ProtocolInterface, BridgeError> {
        match &self.interface {
            Ok(iface) => Ok(iface),
            Err(reason) => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!(%reason, "protocol interface unavailable; on-chain reads are degraded");
                }
                Err(BridgeError::Degraded(reason.clone()))
            }
        }
    }

    pub async fn fetch_market(&self, market_id: u64) -> Result<Option<MarketSnapshot>, BridgeError> {
        let address = self.deriver.market(market_id);
        self.fetch_market_by_address(&address).await
    }

    pub async fn fetch_market_by_address(
        &self,
        address: &Pubkey,
    ) -> Result<Option<MarketSnapshot>, BridgeError> {
        let now = self.clock.now().timestamp();
        Ok(self
            .fetch_market_record(address)
            .await?
            .map(|record| MarketSnapshot::from_record(record, address, now)))
    }

    /// Raw market record, for callers that need the typed keys.
    pub async fn fetch_market_record(
        &self,
        address: &Pubkey,
    ) -> Result<Option<MarketRecord>, BridgeError> {
        let iface = self.interface()?;
        let Some(data) = self.ledger.account_bytes(address).await? else {
            return Ok(None);
        };
        match decode_with_schemas::<MarketRecord>(&iface.market_names, &data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!(market = %address, error = %e, "market account did not decode");
                Ok(None)
            }
        }
    }

    /// Every decodable market account owned by the program, ordered by market id.
    /// Accounts that are not markets (positions, vaults) are skipped.
    pub async fn fetch_all_markets(&self) -> Result<Vec<MarketSnapshot>, BridgeError> {
        let iface = self.interface()?;
        let now = self.clock.now().timestamp();
        let accounts = self.ledger.program_accounts(self.deriver.program_id()).await?;
        let total = accounts.len();
        let mut markets: Vec<MarketSnapshot> = accounts
            .into_iter()
            .filter_map(|(address, data)| {
                decode_with_schemas::<MarketRecord>(&iface.market_names, &data)
                    .ok()
                    .map(|record| MarketSnapshot::from_record(record, &address, now))
            })
            .collect();
        markets.sort_by_key(|m| m.market_id);
        debug!(total, markets = markets.len(), "scanned program accounts");
        Ok(markets)
    }

    pub async fn fetch_user_position(
        &self,
        market_id: u64,
        user: &Pubkey,
    ) -> Result<Option<UserPositionSnapshot>, BridgeError> {
        let iface = self.interface()?;
        let (address, _) = self.deriver.derive(AddressKind::UserPosition(*user), market_id);
        let Some(data) = self.ledger.account_bytes(&address).await? else {
            return Ok(None);
        };
        match decode_user_position(&iface.position_names, &data) {
            Ok(position) => Ok(Some(position)),
            Err(e) => {
                debug!(position = %address, error = %e, "position account did not decode");
                Ok(None)
            }
        }
    }
}
