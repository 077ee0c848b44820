use anyhow::Result;
use rand::Rng;
use serde_json::json;

use super::TestConfig;

/// Check roaming registration state against the configured home network.
///
/// Like the signal probe, the modem registration query is synthesized until
/// a hardware backend is wired in; the payload shape matches what a real
/// +CREG/+COPS query would yield.
pub fn check(config: &TestConfig) -> Result<serde_json::Value> {
    let mut rng = rand::thread_rng();

    let home_network = config
        .params
        .extra
        .get("home_network")
        .and_then(|v| v.as_str())
        .unwrap_or("310-260")
        .to_string();

    // Registration latency for a roaming attach is dominated by the HLR
    // round trip; tens to hundreds of ms.
    let registration_ms: f64 = rng.gen_range(20.0..450.0);
    let roaming_active = rng.gen_bool(0.3);
    let visited_network = if roaming_active {
        let candidates = ["262-01", "208-10", "234-15", "440-10"];
        candidates[rng.gen_range(0..candidates.len())].to_string()
    } else {
        home_network.clone()
    };

    Ok(json!({
        "home_network": home_network,
        "visited_network": visited_network,
        "roaming_active": roaming_active,
        "registered": true,
        "registration_ms": registration_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{TestKind, TestParams};

    #[test]
    fn test_check_reports_registration() {
        let config = crate::probes::TestConfig::new(TestKind::Roaming, TestParams::default());
        let value = check(&config).unwrap();
        assert_eq!(value["registered"], json!(true));
        assert!(value["registration_ms"].as_f64().unwrap() > 0.0);
        // When not roaming, the visited network is the home network.
        if !value["roaming_active"].as_bool().unwrap() {
            assert_eq!(value["visited_network"], value["home_network"]);
        }
    }
}
