//! FX rate resolution
//!
//! External rate services live behind the [`RateSource`] trait; the
//! provider polls them in priority order with a bounded timeout, caches
//! results per ordered pair for a TTL, and falls back to a static table
//! when every source fails. A rate lookup never fails the caller:
//! degraded accuracy is preferred over blocking a payment.

use crate::config::RateConfig;
use crate::metrics::Metrics;
use crate::types::Currency;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors a rate source can report; never escape the provider
#[derive(Debug, thiserror::Error)]
pub enum RateSourceError {
    /// Lookup exceeded the bounded timeout
    #[error("rate lookup timed out")]
    Timeout,

    /// Source reachable but could not quote the pair
    #[error("pair not quoted: {0}/{1}")]
    PairNotQuoted(Currency, Currency),

    /// Source unreachable or returned garbage
    #[error("rate source unavailable: {0}")]
    Unavailable(String),
}

/// External rate lookup seam
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &str;

    /// Fetch the rate for 1 unit of `from` expressed in `to`
    async fn fetch_rate(
        &self,
        from: Currency,
        to: Currency,
    ) -> std::result::Result<Decimal, RateSourceError>;
}

/// Result of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// Source currency
    pub from: Currency,

    /// Target currency
    pub to: Currency,

    /// Converted amount, rounded to 2 decimals
    pub converted_amount: Decimal,

    /// Rate used, rounded to 6 decimals for storage/display
    pub rate: Decimal,
}

struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Rate provider with TTL cache and static fallback
///
/// Process-wide, read-mostly state; staleness within the TTL is tolerated,
/// so concurrent requests share it without further coordination. Injected
/// into the ledger so tests can substitute sources.
pub struct RateProvider {
    sources: RwLock<Vec<Arc<dyn RateSource>>>,
    cache: RwLock<HashMap<(Currency, Currency), CachedRate>>,
    ttl: Duration,
    lookup_timeout: Duration,
    fallback: HashMap<(Currency, Currency), Decimal>,
    metrics: Metrics,
}

impl RateProvider {
    /// Create a provider from configuration; no sources registered yet
    pub fn new(config: &RateConfig, metrics: Metrics) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            fallback: config.fallback_table(),
            metrics,
        }
    }

    /// Register an external source; earlier registrations take priority
    pub fn register_source(&self, source: Arc<dyn RateSource>) {
        self.sources.write().push(source);
    }

    /// Resolve the rate for an ordered pair; never fails
    pub async fn rate(&self, from: Currency, to: Currency) -> Decimal {
        if from == to {
            return Decimal::ONE;
        }

        if let Some(rate) = self.cached(from, to) {
            self.metrics.rate_cache_hits.inc();
            return rate;
        }
        self.metrics.rate_cache_misses.inc();

        // Snapshot the source list so no lock is held across awaits
        let sources: Vec<Arc<dyn RateSource>> = self.sources.read().clone();

        for source in sources {
            let fetched =
                tokio::time::timeout(self.lookup_timeout, source.fetch_rate(from, to)).await;

            match fetched {
                Ok(Ok(rate)) if rate > Decimal::ZERO => {
                    tracing::debug!(source = source.name(), %from, %to, %rate, "Rate fetched");
                    self.store(from, to, rate);
                    return rate;
                }
                Ok(Ok(rate)) => {
                    tracing::warn!(source = source.name(), %from, %to, %rate, "Ignoring non-positive rate");
                }
                Ok(Err(err)) => {
                    tracing::warn!(source = source.name(), %from, %to, %err, "Rate source failed");
                }
                Err(_) => {
                    tracing::warn!(source = source.name(), %from, %to, "Rate lookup timed out");
                }
            }
        }

        // Every source failed: serve the static table, or 1 for unknown pairs
        self.metrics.rate_fallbacks.inc();
        let rate = self
            .fallback
            .get(&(from, to))
            .copied()
            .unwrap_or(Decimal::ONE);
        tracing::warn!(%from, %to, %rate, "Serving fallback rate");
        self.store(from, to, rate);
        rate
    }

    /// Convert an amount; full precision multiply, 2 dp amount, 6 dp rate
    pub async fn convert(&self, from: Currency, to: Currency, amount: Decimal) -> Conversion {
        if from == to {
            return Conversion {
                from,
                to,
                converted_amount: amount.round_dp(2),
                rate: Decimal::ONE,
            };
        }

        let rate = self.rate(from, to).await;

        Conversion {
            from,
            to,
            converted_amount: (amount * rate).round_dp(2),
            rate: rate.round_dp(6),
        }
    }

    fn cached(&self, from: Currency, to: Currency) -> Option<Decimal> {
        let cache = self.cache.read();
        cache
            .get(&(from, to))
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.rate)
    }

    fn store(&self, from: Currency, to: Currency, rate: Decimal) {
        self.cache.write().insert(
            (from, to),
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedSource {
        rate: Decimal,
        calls: AtomicU32,
    }

    impl FixedSource {
        fn new(rate: Decimal) -> Self {
            Self {
                rate,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RateSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch_rate(
            &self,
            _from: Currency,
            _to: Currency,
        ) -> std::result::Result<Decimal, RateSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rate)
        }
    }

    struct FailingSource;

    #[async_trait::async_trait]
    impl RateSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_rate(
            &self,
            from: Currency,
            to: Currency,
        ) -> std::result::Result<Decimal, RateSourceError> {
            Err(RateSourceError::PairNotQuoted(from, to))
        }
    }

    fn provider() -> RateProvider {
        RateProvider::new(&RateConfig::default(), Metrics::default())
    }

    #[tokio::test]
    async fn test_same_currency_is_one() {
        let rates = provider();
        assert_eq!(rates.rate(Currency::MWK, Currency::MWK).await, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_source_rate_is_cached() {
        let rates = provider();
        let source = Arc::new(FixedSource::new(Decimal::new(34, 4)));
        rates.register_source(source.clone());

        let first = rates.rate(Currency::MWK, Currency::ZMW).await;
        let second = rates.rate(Currency::MWK, Currency::ZMW).await;

        assert_eq!(first, Decimal::new(34, 4));
        assert_eq!(second, first);
        // Second lookup hit the cache
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_when_sources_fail() {
        let rates = provider();
        rates.register_source(Arc::new(FailingSource));

        let rate = rates.rate(Currency::MWK, Currency::ZMW).await;
        assert_eq!(rate, Decimal::new(32, 4));
    }

    #[tokio::test]
    async fn test_unknown_pair_defaults_to_one() {
        let rates = provider();
        let rate = rates.rate(Currency::ZMW, Currency::ZAR).await;
        assert_eq!(rate, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_source_priority_order() {
        let rates = provider();
        rates.register_source(Arc::new(FailingSource));
        rates.register_source(Arc::new(FixedSource::new(Decimal::new(35, 4))));

        // First source fails, second answers
        let rate = rates.rate(Currency::MWK, Currency::ZMW).await;
        assert_eq!(rate, Decimal::new(35, 4));
    }

    #[tokio::test]
    async fn test_convert_rounding() {
        let rates = provider();

        // 500 MWK at fallback 0.0032 = 1.60 ZMW
        let conversion = rates
            .convert(Currency::MWK, Currency::ZMW, Decimal::new(50000, 2))
            .await;
        assert_eq!(conversion.converted_amount, Decimal::new(160, 2));
        assert_eq!(conversion.rate, Decimal::new(32, 4).round_dp(6));
    }

    #[tokio::test]
    async fn test_convert_same_currency() {
        let rates = provider();
        let conversion = rates
            .convert(Currency::ZMW, Currency::ZMW, Decimal::new(12345, 2))
            .await;
        assert_eq!(conversion.converted_amount, Decimal::new(12345, 2));
        assert_eq!(conversion.rate, Decimal::ONE);
    }
}
