//! Fetches a handful of words through a flaky mock provider.
//!
//! Shows caching, pacing and retry together. Run with
//! `RUST_LOG=wordpace=debug` to see cache hits and dispatches.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wordpace::prelude::*;

/// Throttles every third call, like a provider near its quota.
struct FlakyProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl WordSource for FlakyProvider {
    async fn fetch(&self, word: &str, language: &str) -> Result<serde_json::Value, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if n % 3 == 2 {
            return Err(FetchError::from_status(429, "quota exceeded"));
        }
        Ok(json!({
            "word": word,
            "meaning": format!("{word} ({language})"),
            "examples": [format!("I looked up {word} today.")],
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig {
        limiter: LimiterConfig { min_interval_ms: 200, max_requests_per_window: 4, window_duration_ms: 2_000 },
        retry: RetryConfig { initial_delay_ms: 250, max_delay_ms: 1_000, ..RetryConfig::default() },
        ..ServiceConfig::default()
    };
    let service = WordInfoService::builder(FlakyProvider { calls: AtomicUsize::new(0) })
        .config(config)
        .on_retry(|n, err| println!("   retry #{n} after: {err}"))
        .build()?;

    println!("=== wordpace: fetch words ===\n");
    for word in ["apple", "Banana", "cherry", "apple", " BANANA ", "durian"] {
        let info = service.fetch_word_info(word, "en").await?;
        let status = service.status();
        println!(
            "{word:>10} -> {:<20} remaining={} reset_in={}s",
            info.meaning, status.remaining_requests, status.reset_in_seconds
        );
    }

    println!("\ncached entries: {}", service.cache().len());
    Ok(())
}
