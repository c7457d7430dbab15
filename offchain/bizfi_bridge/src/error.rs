use thiserror::Error;

use crate::{
    guardrails::{store::StoreError, GuardrailDecision},
    interface::InterfaceError,
    ledger::LedgerError,
    precheck::PrecheckFailure,
    verifier::VerifyError,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not valid: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Every failure a bridge operation can report to its caller.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Verification(#[from] VerifyError),
    #[error("{0}")]
    Precheck(PrecheckFailure),
    #[error("blocked by guardrails: {}", .0.reasons.join("; "))]
    Guardrail(GuardrailDecision),
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] LedgerError),
    #[error("on-chain reads are degraded: {0}")]
    Degraded(String),
    #[error("guardrail state unavailable: {0}")]
    State(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidInput(_) => "invalid_input",
            BridgeError::Verification(_) => "verification_failed",
            BridgeError::Precheck(_) => "precheck_failed",
            BridgeError::Guardrail(_) => "guardrail_blocked",
            BridgeError::Upstream(_) => "upstream_unavailable",
            BridgeError::Degraded(_) => "degraded",
            BridgeError::State(_) => "state_unavailable",
            BridgeError::Config(_) => "config",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Upstream(e) => e.is_retryable(),
            BridgeError::State(_) => true,
            _ => false,
        }
    }
}

impl From<InterfaceError> for BridgeError {
    fn from(e: InterfaceError) -> Self {
        BridgeError::Degraded(e.to_string())
    }
}

impl From<PrecheckFailure> for BridgeError {
    fn from(f: PrecheckFailure) -> Self {
        BridgeError::Precheck(f)
    }
}
