use anyhow::Result;
use serde_json::json;

use super::{signal, TestConfig};

/// Number of signal reads aggregated into one coverage verdict.
const READS: usize = 8;

/// One-shot coverage validation: aggregate a burst of signal reads into a
/// single coverage score. Runs once per test, then the test completes.
pub fn validate(config: &TestConfig) -> Result<serde_json::Value> {
    let mut rssi_values = Vec::with_capacity(READS);
    for _ in 0..READS {
        let reading = signal::read(config)?;
        if let Some(rssi) = reading.get("rssi_dbm").and_then(|v| v.as_f64()) {
            rssi_values.push(rssi);
        }
    }

    if rssi_values.is_empty() {
        anyhow::bail!("coverage validation produced no signal readings");
    }

    let count = rssi_values.len();
    let avg_rssi = rssi_values.iter().sum::<f64>() / count as f64;
    let min_rssi = rssi_values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_rssi = rssi_values
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let score = signal::quality_score(avg_rssi);

    let verdict = if score >= 75.0 {
        "good"
    } else if score >= 40.0 {
        "marginal"
    } else {
        "poor"
    };

    Ok(json!({
        "reads": count,
        "avg_rssi_dbm": avg_rssi,
        "min_rssi_dbm": min_rssi,
        "max_rssi_dbm": max_rssi,
        "coverage_score": score,
        "verdict": verdict,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{TestKind, TestParams};

    #[test]
    fn test_validate_aggregates_reads() {
        let config = crate::probes::TestConfig::new(TestKind::Coverage, TestParams::default());
        let value = validate(&config).unwrap();
        assert_eq!(value["reads"], json!(READS));
        let score = value["coverage_score"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(value["verdict"].is_string());
    }
}
