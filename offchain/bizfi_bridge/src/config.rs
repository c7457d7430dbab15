use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use solana_sdk::pubkey::Pubkey;

use crate::{error::ConfigError, protocol::DEFAULT_PROGRAM_ID};

pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";
const HELIUS_DEVNET_URL: &str = "https://devnet.helius-rpc.com/?api-key=";

/// Risk and content limits, fixed at start.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailConfig {
    pub confidence_threshold: f64,
    pub max_allocation_percent: u32,
    /// micro-units
    pub daily_risk_budget: u64,
    /// empty admits every market
    pub market_whitelist: Vec<u64>,
    pub human_daily_create_limit: u32,
    pub agent_daily_create_limit: u32,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.65,
            max_allocation_percent: 10,
            daily_risk_budget: 50_000_000,
            market_whitelist: Vec::new(),
            human_daily_create_limit: 4,
            agent_daily_create_limit: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub rpc_url: String,
    pub program_id: Pubkey,
    pub idl_path: Option<PathBuf>,
    pub creation_fee: u64,
    pub fee_collector: Option<Pubkey>,
    pub rpc_timeout: Duration,
    pub submit_timeout: Duration,
    pub listen_addr: SocketAddr,
    pub state_dir: Option<PathBuf>,
    pub audit_log_path: Option<PathBuf>,
    pub guardrails: GuardrailConfig,
}

impl BridgeConfig {
    /// Reads the process environment after loading `.env`, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let rpc_url = match (get("HELIUS_API_KEY"), get("SOLANA_RPC_URL")) {
            (Some(key), _) => format!("{HELIUS_DEVNET_URL}{key}"),
            (None, Some(url)) => url,
            (None, None) => DEVNET_RPC_URL.to_string(),
        };

        let program_id = parse_or("SOLANA_PROGRAM_ID", get("SOLANA_PROGRAM_ID"), || {
            Pubkey::from_str(DEFAULT_PROGRAM_ID).map_err(|e| ConfigError::Invalid {
                var: "SOLANA_PROGRAM_ID",
                reason: e.to_string(),
            })
        })?;

        let creation_fee = parse_or("MARKET_CREATION_FEE_MICROUSDC", get("MARKET_CREATION_FEE_MICROUSDC"), || {
            Ok(1_000_000)
        })?;
        let fee_collector = parse_opt("MARKET_FEE_COLLECTOR_ATA", get("MARKET_FEE_COLLECTOR_ATA"))?;

        let rpc_timeout_ms: u64 = parse_or("RPC_TIMEOUT_MS", get("RPC_TIMEOUT_MS"), || Ok(10_000))?;
        let submit_timeout_ms: u64 =
            parse_or("SUBMIT_TIMEOUT_MS", get("SUBMIT_TIMEOUT_MS"), || Ok(60_000))?;

        let listen_addr = parse_or("BRIDGE_LISTEN_ADDR", get("BRIDGE_LISTEN_ADDR"), || {
            Ok(SocketAddr::from(([0, 0, 0, 0], 8767)))
        })?;

        let defaults = GuardrailConfig::default();
        let confidence_threshold: f64 = parse_or("CONFIDENCE_THRESHOLD", get("CONFIDENCE_THRESHOLD"), || {
            Ok(defaults.confidence_threshold)
        })?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::Invalid {
                var: "CONFIDENCE_THRESHOLD",
                reason: "must be within [0, 1]".into(),
            });
        }
        let max_allocation_percent: u32 =
            parse_or("MAX_ALLOCATION_PERCENT", get("MAX_ALLOCATION_PERCENT"), || {
                Ok(defaults.max_allocation_percent)
            })?;
        if max_allocation_percent > 100 {
            return Err(ConfigError::Invalid {
                var: "MAX_ALLOCATION_PERCENT",
                reason: "must be at most 100".into(),
            });
        }

        let market_whitelist = match get("MARKET_WHITELIST") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map_err(|e| ConfigError::Invalid {
                        var: "MARKET_WHITELIST",
                        reason: format!("{s}: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let guardrails = GuardrailConfig {
            confidence_threshold,
            max_allocation_percent,
            daily_risk_budget: parse_or(
                "DAILY_RISK_BUDGET_MICROUSDC",
                get("DAILY_RISK_BUDGET_MICROUSDC"),
                || Ok(defaults.daily_risk_budget),
            )?,
            market_whitelist,
            human_daily_create_limit: parse_or(
                "HUMAN_DAILY_CREATE_LIMIT",
                get("HUMAN_DAILY_CREATE_LIMIT"),
                || Ok(defaults.human_daily_create_limit),
            )?,
            agent_daily_create_limit: parse_or(
                "AGENT_DAILY_CREATE_LIMIT",
                get("AGENT_DAILY_CREATE_LIMIT"),
                || Ok(defaults.agent_daily_create_limit),
            )?,
        };

        Ok(Self {
            rpc_url,
            program_id,
            idl_path: get("SOLANA_IDL_PATH").map(PathBuf::from),
            creation_fee,
            fee_collector,
            rpc_timeout: Duration::from_millis(rpc_timeout_ms),
            submit_timeout: Duration::from_millis(submit_timeout_ms),
            listen_addr,
            state_dir: get("GUARDRAIL_STATE_DIR").map(PathBuf::from),
            audit_log_path: get("AUDIT_LOG_PATH").map(PathBuf::from),
            guardrails,
        })
    }
}

fn parse_opt<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn parse_or<T, D>(var: &'static str, raw: Option<String>, default: D) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    D: FnOnce() -> Result<T, ConfigError>,
{
    match parse_opt(var, raw)? {
        Some(v) => Ok(v),
        None => default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<BridgeConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.rpc_url, DEVNET_RPC_URL);
        assert_eq!(cfg.program_id.to_string(), DEFAULT_PROGRAM_ID);
        assert_eq!(cfg.creation_fee, 1_000_000);
        assert!(cfg.fee_collector.is_none());
        assert_eq!(cfg.rpc_timeout, Duration::from_secs(10));
        assert_eq!(cfg.listen_addr.port(), 8767);
        assert_eq!(cfg.guardrails, GuardrailConfig::default());
    }

    #[test]
    fn helius_key_overrides_rpc_url() {
        let cfg = config(&[("HELIUS_API_KEY", "abc"), ("SOLANA_RPC_URL", "http://x")]).unwrap();
        assert!(cfg.rpc_url.ends_with("api-key=abc"));
    }

    #[test]
    fn whitelist_is_parsed() {
        let cfg = config(&[("MARKET_WHITELIST", "1, 2,,7")]).unwrap();
        assert_eq!(cfg.guardrails.market_whitelist, vec![1, 2, 7]);
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = config(&[("MAX_ALLOCATION_PERCENT", "ten")]).unwrap_err();
        assert!(err.to_string().starts_with("MAX_ALLOCATION_PERCENT"));
        let err = config(&[("MARKET_FEE_COLLECTOR_ATA", "not-a-key")]).unwrap_err();
        assert!(err.to_string().starts_with("MARKET_FEE_COLLECTOR_ATA"));
    }
}
