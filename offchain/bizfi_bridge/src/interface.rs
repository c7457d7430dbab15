//! The program's interface description (Anchor IDL), reduced to the names the
//! bridge depends on.

use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

pub const MARKET_ACCOUNT: &str = "Market";
pub const USER_POSITION_ACCOUNT: &str = "UserPosition";

#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("IDL file not found at {0}")]
    Missing(String),
    #[error("IDL file {path} could not be read: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("IDL is incompatible: {0}")]
    Incompatible(String),
}

#[derive(Debug, Deserialize)]
struct IdlEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IdlDocument {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    instructions: Vec<IdlEntry>,
    #[serde(default)]
    accounts: Vec<IdlEntry>,
}

/// Account schema names in the order the decoder should try them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInterface {
    pub market_names: Vec<String>,
    pub position_names: Vec<String>,
    pub declared_address: Option<String>,
}

impl Default for ProtocolInterface {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProtocolInterface {
    pub fn builtin() -> Self {
        Self {
            market_names: candidate_names(MARKET_ACCOUNT, None),
            position_names: candidate_names(USER_POSITION_ACCOUNT, None),
            declared_address: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, InterfaceError> {
        let shown = path.display().to_string();
        if !path.exists() {
            return Err(InterfaceError::Missing(shown));
        }
        let raw = fs::read_to_string(path).map_err(|e| InterfaceError::Unreadable {
            path: shown.clone(),
            reason: e.to_string(),
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, InterfaceError> {
        let doc: IdlDocument =
            serde_json::from_str(raw).map_err(|e| InterfaceError::Incompatible(e.to_string()))?;

        for ix in ["place_bet", "initialize_market"] {
            if !doc.instructions.iter().any(|e| same_name(&e.name, ix)) {
                return Err(InterfaceError::Incompatible(format!(
                    "instruction {ix} is not declared"
                )));
            }
        }

        let declared = |wanted: &str| {
            doc.accounts
                .iter()
                .find(|e| same_name(&e.name, wanted))
                .map(|e| e.name.clone())
                .ok_or_else(|| {
                    InterfaceError::Incompatible(format!("account {wanted} is not declared"))
                })
        };
        let market = declared(MARKET_ACCOUNT)?;
        let position = declared(USER_POSITION_ACCOUNT)?;

        Ok(Self {
            market_names: candidate_names(MARKET_ACCOUNT, Some(&market)),
            position_names: candidate_names(USER_POSITION_ACCOUNT, Some(&position)),
            declared_address: doc.address,
        })
    }
}

/// Declared name first, then PascalCase, then camelCase, without repeats.
fn candidate_names(pascal: &str, declared: Option<&str>) -> Vec<String> {
    let mut camel = pascal.to_string();
    if let Some(first) = camel.get_mut(..1) {
        first.make_ascii_lowercase();
    }
    let mut names: Vec<String> = Vec::with_capacity(3);
    for name in declared.into_iter().chain([pascal, camel.as_str()]) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Case- and underscore-insensitive comparison (`placeBet` == `place_bet`).
fn same_name(a: &str, b: &str) -> bool {
    let fold = |s: &str| {
        s.chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    fold(a) == fold(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tries_pascal_then_camel() {
        let iface = ProtocolInterface::builtin();
        assert_eq!(iface.market_names, vec!["Market", "market"]);
        assert_eq!(iface.position_names, vec!["UserPosition", "userPosition"]);
    }

    #[test]
    fn parse_puts_declared_casing_first() {
        let raw = r#"{
            "address": "5JUtUiusEUzwgub1LTztjGJ1h2krpzqBaVfQrEHHwJbr",
            "instructions": [{"name": "initializeMarket"}, {"name": "placeBet"}],
            "accounts": [{"name": "market"}, {"name": "userPosition"}]
        }"#;
        let iface = ProtocolInterface::parse(raw).unwrap();
        assert_eq!(iface.market_names, vec!["market", "Market"]);
        assert_eq!(iface.position_names, vec!["userPosition", "UserPosition"]);
        assert!(iface.declared_address.is_some());
    }

    #[test]
    fn parse_rejects_missing_instruction() {
        let raw = r#"{"instructions": [{"name": "place_bet"}], "accounts": [{"name": "Market"}, {"name": "UserPosition"}]}"#;
        let err = ProtocolInterface::parse(raw).unwrap_err();
        assert!(err.to_string().contains("initialize_market"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ProtocolInterface::load(Path::new("/nonexistent/bizfi_market.json")).unwrap_err();
        assert!(matches!(err, InterfaceError::Missing(_)));
    }
}
