use anyhow::{Context, Result};
use serde_json::json;
use std::time::Instant;

use super::TestConfig;

/// Requests fired per tick of an API load test.
const LOAD_BURST: usize = 5;

fn target_url(config: &TestConfig) -> Result<&str> {
    config
        .params
        .target
        .as_deref()
        .context("api test requires a target URL")
}

/// Single-request API health check: status code plus response latency.
pub async fn health(http: &reqwest::Client, config: &TestConfig) -> Result<serde_json::Value> {
    let target = target_url(config)?;

    let start = Instant::now();
    let response = http
        .get(target)
        .send()
        .await
        .with_context(|| format!("health check request to {} failed", target))?;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status();
    Ok(json!({
        "target": target,
        "status": status.as_u16(),
        "healthy": status.is_success(),
        "latency_ms": latency_ms,
    }))
}

/// One load-test iteration: a small concurrent burst of requests, reported
/// as aggregate latency and error counts.
pub async fn load(http: &reqwest::Client, config: &TestConfig) -> Result<serde_json::Value> {
    let target = target_url(config)?.to_string();

    let requests = (0..LOAD_BURST).map(|_| {
        let http = http.clone();
        let target = target.clone();
        async move {
            let start = Instant::now();
            let result = http.get(&target).send().await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            match result {
                Ok(response) if response.status().is_success() => Ok(latency_ms),
                Ok(response) => Err(format!("status {}", response.status())),
                Err(e) => Err(e.to_string()),
            }
        }
    });

    let outcomes = futures::future::join_all(requests).await;

    let mut latencies = Vec::new();
    let mut errors = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(latency) => latencies.push(latency),
            Err(_) => errors += 1,
        }
    }

    if latencies.is_empty() {
        anyhow::bail!("all {} load requests to {} failed", LOAD_BURST, target);
    }

    let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
    let max = latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    Ok(json!({
        "target": target,
        "requests": LOAD_BURST,
        "succeeded": latencies.len(),
        "errors": errors,
        "avg_latency_ms": avg,
        "max_latency_ms": max,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{TestKind, TestParams};

    #[tokio::test]
    async fn test_health_requires_target() {
        let config = crate::probes::TestConfig::new(TestKind::ApiHealth, TestParams::default());
        let http = reqwest::Client::new();
        let err = health(&http, &config).await.unwrap_err();
        assert!(err.to_string().contains("target"));
    }
}
