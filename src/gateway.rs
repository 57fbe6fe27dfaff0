//! Quote gateway with a bounded retry budget

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::broker::QuoteApi;
use crate::config::QuoteConfig;
use crate::error::{BrokerError, QuoteError};
use crate::types::{Quote, Segment};

/// Wraps a [`QuoteApi`] with at most `max_attempts` tries and a fixed pause
/// between them. Idempotent; holds no state between calls.
#[derive(Clone)]
pub struct QuoteGateway {
    api: Arc<dyn QuoteApi>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl QuoteGateway {
    pub fn new(api: Arc<dyn QuoteApi>, config: &QuoteConfig) -> Self {
        Self {
            api,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    pub async fn fetch_quotes(
        &self,
        instrument_ids: &[String],
        segment: Segment,
    ) -> Result<HashMap<String, Quote>, QuoteError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.api.quotes(instrument_ids, segment).await {
                Ok(quotes) => {
                    debug!("Fetched {} quotes on attempt {}", quotes.len(), attempt);
                    return Ok(quotes);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "Quote fetch attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.max_attempts, e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!("Quote fetch failed after {} attempts: {}", attempt, e);
                    return Err(QuoteError::FetchFailed { attempts: attempt, last: e });
                }
            }
        }
    }

    /// Last traded price of a single instrument
    pub async fn last_price(&self, instrument_id: &str, segment: Segment) -> Result<Decimal, QuoteError> {
        let ids = [instrument_id.to_string()];
        let quotes = self.fetch_quotes(&ids, segment).await?;
        quotes
            .get(instrument_id)
            .map(|q| q.last_price)
            .ok_or_else(|| QuoteError::FetchFailed {
                attempts: self.max_attempts,
                last: BrokerError::DataShape(format!("no quote returned for {}", instrument_id)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers
    struct FlakyQuotes {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl QuoteApi for FlakyQuotes {
        async fn quotes(&self, ids: &[String], _segment: Segment) -> BrokerResult<HashMap<String, Quote>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(BrokerError::Transient("connection reset".into()));
            }
            Ok(ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        Quote {
                            last_price: Decimal::from(101),
                            day_low: Decimal::from(99),
                            day_high: Decimal::from(102),
                            net_change: Decimal::ONE,
                        },
                    )
                })
                .collect())
        }
    }

    fn gateway(failures: u32) -> (QuoteGateway, Arc<FlakyQuotes>) {
        let api = Arc::new(FlakyQuotes { failures, calls: AtomicU32::new(0) });
        (QuoteGateway::new(api.clone(), &QuoteConfig::default()), api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_is_retried() {
        let (gateway, api) = gateway(1);
        let price = gateway.last_price("1333", Segment::NseEq).await.unwrap();
        assert_eq!(price, Decimal::from(101));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_two_attempts() {
        let (gateway, api) = gateway(5);
        let err = gateway
            .fetch_quotes(&["1333".to_string()], Segment::NseEq)
            .await
            .unwrap_err();
        let QuoteError::FetchFailed { attempts, last } = err;
        assert_eq!(attempts, 2);
        assert!(last.is_transient());
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_the_configured_delay() {
        let (gateway, _api) = gateway(1);
        let start = tokio::time::Instant::now();
        gateway.fetch_quotes(&["1".to_string()], Segment::NseEq).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
