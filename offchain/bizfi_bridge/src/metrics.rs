//! Process-local activity counters fed by confirmed submissions and analyses.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Entries kept per series; the oldest are dropped first.
pub const MAX_RECENT: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeMetric {
    pub user: String,
    pub amount: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMetric {
    pub creator: String,
    pub fee_paid: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisMetric {
    pub user: String,
    pub market_id: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_trades: usize,
    pub total_trade_volume_micro_usdc: u64,
    pub total_creates: usize,
    pub total_creation_fees_micro_usdc: u64,
    pub total_analyses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorActivity {
    pub creator: String,
    pub creates: usize,
    pub fees_paid_micro_usdc: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    trades: Mutex<VecDeque<TradeMetric>>,
    creates: Mutex<VecDeque<CreateMetric>>,
    analyses: Mutex<VecDeque<AnalysisMetric>>,
}

fn push_bounded<T>(series: &Mutex<VecDeque<T>>, item: T) {
    let mut series = series.lock();
    series.push_back(item);
    while series.len() > MAX_RECENT {
        series.pop_front();
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trade(&self, user: &str, amount: u64, at: DateTime<Utc>) {
        push_bounded(
            &self.trades,
            TradeMetric {
                user: user.to_owned(),
                amount,
                at,
            },
        );
    }

    pub fn record_create(&self, creator: &str, fee_paid: u64, at: DateTime<Utc>) {
        push_bounded(
            &self.creates,
            CreateMetric {
                creator: creator.to_owned(),
                fee_paid,
                at,
            },
        );
    }

    pub fn record_analysis(&self, user: &str, market_id: u64, at: DateTime<Utc>) {
        push_bounded(
            &self.analyses,
            AnalysisMetric {
                user: user.to_owned(),
                market_id,
                at,
            },
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let trades = self.trades.lock();
        let creates = self.creates.lock();
        MetricsSnapshot {
            total_trades: trades.len(),
            total_trade_volume_micro_usdc: trades.iter().fold(0u64, |sum, t| sum.saturating_add(t.amount)),
            total_creates: creates.len(),
            total_creation_fees_micro_usdc: creates
                .iter()
                .fold(0u64, |sum, c| sum.saturating_add(c.fee_paid)),
            total_analyses: self.analyses.lock().len(),
        }
    }

    /// Creators ranked by markets created, then by fees paid.
    pub fn creator_activity(&self) -> Vec<CreatorActivity> {
        let mut by_creator: HashMap<&str, (usize, u64)> = HashMap::new();
        let creates = self.creates.lock();
        for entry in creates.iter() {
            let stats = by_creator.entry(entry.creator.as_str()).or_default();
            stats.0 += 1;
            stats.1 = stats.1.saturating_add(entry.fee_paid);
        }
        let mut ranked: Vec<CreatorActivity> = by_creator
            .into_iter()
            .map(|(creator, (creates, fees))| CreatorActivity {
                creator: creator.to_owned(),
                creates,
                fees_paid_micro_usdc: fees,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.creates
                .cmp(&a.creates)
                .then(b.fees_paid_micro_usdc.cmp(&a.fees_paid_micro_usdc))
                .then_with(|| a.creator.cmp(&b.creator))
        });
        ranked
    }
}
