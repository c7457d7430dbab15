use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Analysis,
    BetSubmitted,
    MarketCreated,
    CreationBlocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub user: String,
    pub market_id: Option<u64>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Where reasoning and execution records go. Failures are reported, never fatal.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        info!(target: "bizfi_bridge::audit", kind = ?record.kind, user = %record.user, "{line}");
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("bizfi-audit-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let sink = JsonlAuditSink::new(&path);
        for i in 0..2 {
            let rec = AuditRecord {
                kind: AuditKind::BetSubmitted,
                user: "alice".into(),
                market_id: Some(i),
                payload: json!({ "amount": 1 }),
                created_at: Utc::now(),
            };
            sink.record(&rec).await.unwrap();
        }
        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "bet_submitted");
        assert_eq!(first["market_id"], 0);
        let _ = std::fs::remove_file(&path);
    }
}
