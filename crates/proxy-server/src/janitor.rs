use proxy_cache::ResponseCache;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Background task that reclaims expired cache entries every `every`.
///
/// Lookups already ignore expired entries; this only frees their memory.
pub async fn sweep_expired(
    cache: Arc<ResponseCache>,
    every: Duration,
    shutdown: CancellationToken,
) {
    if every.is_zero() {
        tracing::warn!("cache sweep interval is zero, expired entries will not be reclaimed");
        return;
    }

    let start = tokio::time::Instant::now() + every;
    let mut interval = tokio::time::interval_at(start, every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let swept = cache.purge_expired();
                if swept > 0 {
                    metrics::counter!("proxy_cache_swept_total").increment(swept as u64);
                }
                tracing::debug!(swept, remaining = cache.len(), "expired entries swept");
            }
        }
    }

    tracing::debug!("cache sweeper stopped");
}
