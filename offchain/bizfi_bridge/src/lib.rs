//! Off-chain counterpart of the BizFi market program: builds unsigned
//! transactions for wallets to sign, verifies what comes back before relaying
//! it, and gates trades and market creation behind guardrails.

pub mod accounts;
pub mod analysis;
pub mod audit;
pub mod builder;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod guardrails;
pub mod interface;
pub mod ledger;
pub mod metrics;
pub mod precheck;
pub mod protocol;
pub mod reader;
pub mod relay_server;
pub mod service;
pub mod types;
pub mod verifier;

pub use error::BridgeError;
pub use service::BridgeService;
