use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bizfi_bridge::{
    audit::{AuditSink, JsonlAuditSink, TracingAuditSink},
    clock::SystemClock,
    config::BridgeConfig,
    guardrails::{
        store::{FileStore, GuardrailStore, StoreEntry},
        GuardrailStores,
    },
    ledger::RpcLedger,
    relay_server::RelayServer,
    service::{BridgeService, ServiceOptions},
};

fn open_stores(cfg: &BridgeConfig) -> Result<GuardrailStores> {
    let Some(dir) = &cfg.state_dir else {
        info!("guardrail state is in-memory");
        return Ok(GuardrailStores::in_memory());
    };
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    info!(dir = %dir.display(), "guardrail state persisted to disk");

    fn open<V: StoreEntry>(
        dir: &std::path::Path,
        name: &str,
    ) -> Result<Arc<dyn GuardrailStore<V>>> {
        Ok(Arc::new(FileStore::<V>::open(dir.join(name))?))
    }
    Ok(GuardrailStores {
        budgets: open(dir, "daily_budgets.json")?,
        quotas: open(dir, "creation_quotas.json")?,
        questions: open(dir, "recent_questions.json")?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = BridgeConfig::from_env()?;
    info!(rpc = %cfg.rpc_url, program = %cfg.program_id, "starting bizfi bridge");
    if cfg.creation_fee > 0 && cfg.fee_collector.is_none() {
        warn!("MARKET_FEE_COLLECTOR_ATA is unset; market creation will be refused");
    }

    let ledger = Arc::new(RpcLedger::new(
        cfg.rpc_url.clone(),
        cfg.rpc_timeout,
        cfg.submit_timeout,
    ));

    // startup check
    match ledger.program_status(&cfg.program_id).await {
        Ok(status) => info!(
            exists = status.exists,
            executable = status.executable,
            lamports = status.lamports,
            "program account status"
        ),
        Err(e) => warn!(error = %e, "could not read program account"),
    }

    let opts = ServiceOptions::from_config(&cfg);
    match &opts.interface {
        Ok(iface) => info!(market = ?iface.market_names, position = ?iface.position_names, "protocol interface ready"),
        Err(reason) => warn!(%reason, "protocol interface unavailable; reads will be degraded"),
    }

    let audit: Arc<dyn AuditSink> = match &cfg.audit_log_path {
        Some(path) => Arc::new(JsonlAuditSink::new(path.clone())),
        None => Arc::new(TracingAuditSink),
    };

    let service = Arc::new(BridgeService::new(
        opts,
        ledger,
        open_stores(&cfg)?,
        audit,
        Arc::new(SystemClock),
    ));

    let server = Arc::new(RelayServer::new(cfg.listen_addr, service));
    server.run().await
}
