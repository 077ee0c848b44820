use anyhow::{Context, Result};
use serde_json::json;
use std::time::Instant;

use super::TestConfig;

/// Default download target when the test config does not name one.
/// Cloudflare's speed endpoint serves an arbitrary number of bytes.
const DEFAULT_TARGET: &str = "https://speed.cloudflare.com/__down?bytes=1000000";

/// Measure download throughput by timing an HTTP body transfer.
///
/// Returns `{ download_mbps, latency_ms, bytes }`. Latency is time to first
/// response headers; throughput is computed over the full body.
pub async fn measure(http: &reqwest::Client, config: &TestConfig) -> Result<serde_json::Value> {
    let target = config
        .params
        .target
        .as_deref()
        .unwrap_or(DEFAULT_TARGET);

    let start = Instant::now();
    let response = http
        .get(target)
        .send()
        .await
        .with_context(|| format!("speed test request to {} failed", target))?;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("speed test target {} returned {}", target, status);
    }

    let body = response
        .bytes()
        .await
        .context("speed test body transfer failed")?;
    let elapsed = start.elapsed();

    let bytes = body.len() as u64;
    let secs = elapsed.as_secs_f64().max(1e-6);
    let download_mbps = (bytes as f64 * 8.0) / secs / 1_000_000.0;

    Ok(json!({
        "target": target,
        "download_mbps": download_mbps,
        "latency_ms": latency_ms,
        "bytes": bytes,
        "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
    }))
}
