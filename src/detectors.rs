//! Opening-range breakout detector
//!
//! The daily build loads the day's pre-computed ranges. Each scan compares
//! live prices against them: above the high is LONG from the high, below
//! the low is SHORT from the low.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::gateway::QuoteGateway;
use crate::sizing::{FundCache, RiskSizer};
use crate::strategy::Detector;
use crate::types::{Segment, Side, SignalRecord, TradeCandidate};

/// One instrument's range for the day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutRange {
    pub instrument_id: String,
    pub name: String,
    pub range_high: Decimal,
    pub range_low: Decimal,
    /// Stop for an upside breakout
    pub long_stop: Decimal,
    /// Stop for a downside breakout
    pub short_stop: Decimal,
}

impl BreakoutRange {
    /// Side, entry and stop if `price` has left the range
    pub fn evaluate(&self, price: Decimal) -> Option<(Side, Decimal, Decimal)> {
        if price > self.range_high {
            Some((Side::Long, self.range_high, self.long_stop))
        } else if price < self.range_low {
            Some((Side::Short, self.range_low, self.short_stop))
        } else {
            None
        }
    }

    fn is_valid(&self) -> bool {
        self.range_low > Decimal::ZERO
            && self.range_high >= self.range_low
            && self.long_stop < self.range_high
            && self.short_stop > self.range_low
    }
}

pub struct RangeBreakoutDetector {
    name: String,
    ranges_file: PathBuf,
    signals_file: Option<PathBuf>,
    segment: Segment,
    quotes: QuoteGateway,
    funds: Arc<FundCache>,
    sizer: RiskSizer,
    ranges: RwLock<Vec<BreakoutRange>>,
}

impl RangeBreakoutDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        ranges_file: PathBuf,
        signals_file: Option<PathBuf>,
        segment: Segment,
        quotes: QuoteGateway,
        funds: Arc<FundCache>,
        sizer: RiskSizer,
    ) -> Self {
        Self {
            name: name.into(),
            ranges_file,
            signals_file,
            segment,
            quotes,
            funds,
            sizer,
            ranges: RwLock::new(Vec::new()),
        }
    }

    pub async fn armed(&self) -> usize {
        self.ranges.read().await.len()
    }

    async fn write_signals(&self, candidates: &[TradeCandidate]) {
        let Some(path) = &self.signals_file else {
            return;
        };
        let records: Vec<SignalRecord> = candidates.iter().map(SignalRecord::from).collect();
        let result = match serde_json::to_vec_pretty(&records) {
            Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(strategy = %self.name, "Failed to write signals to {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl Detector for RangeBreakoutDetector {
    async fn build(&self) -> anyhow::Result<usize> {
        let raw = tokio::fs::read_to_string(&self.ranges_file).await.map_err(|e| {
            anyhow::anyhow!("Cannot read ranges file {}: {}", self.ranges_file.display(), e)
        })?;
        let parsed: Vec<BreakoutRange> = serde_json::from_str(&raw).map_err(|e| {
            anyhow::anyhow!("Malformed ranges file {}: {}", self.ranges_file.display(), e)
        })?;

        let total = parsed.len();
        let valid: Vec<BreakoutRange> = parsed
            .into_iter()
            .filter(|r| {
                let ok = r.is_valid();
                if !ok {
                    warn!(strategy = %self.name, "Skipping inconsistent range for {}", r.name);
                }
                ok
            })
            .collect();

        info!(strategy = %self.name, "Loaded {}/{} ranges", valid.len(), total);
        let armed = valid.len();
        *self.ranges.write().await = valid;
        Ok(armed)
    }

    async fn scan(&self) -> anyhow::Result<Vec<TradeCandidate>> {
        let ranges = self.ranges.read().await.clone();
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        let fund = self.funds.refresh().await?;
        let ids: Vec<String> = ranges.iter().map(|r| r.instrument_id.clone()).collect();
        let quotes = self.quotes.fetch_quotes(&ids, self.segment).await?;

        let mut candidates = Vec::new();
        for range in &ranges {
            let Some(quote) = quotes.get(&range.instrument_id) else {
                debug!(strategy = %self.name, "No quote for {}", range.name);
                continue;
            };
            let price = quote.last_price;
            let Some((side, entry, stop)) = range.evaluate(price) else {
                continue;
            };

            let size = self.sizer.size(price, entry, stop, &range.instrument_id, &fund);
            if size.quantity == 0 {
                debug!(strategy = %self.name, "{} breakout not tradable at size 0", range.name);
                continue;
            }

            candidates.push(TradeCandidate {
                instrument_id: range.instrument_id.clone(),
                name: range.name.clone(),
                side,
                price,
                entry,
                stop,
                target: None,
                quantity: size.quantity,
                expected_loss: size.expected_loss,
                exposure: size.exposure,
            });
        }

        self.write_signals(&candidates).await;
        Ok(candidates)
    }
}
