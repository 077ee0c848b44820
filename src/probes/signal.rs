use anyhow::Result;
use rand::Rng;
use serde_json::json;

use super::TestConfig;

/// Read the current radio signal levels from the modem.
///
/// Hardware modem access (AT commands / QMI) is platform-specific; this
/// reads a synthetic but realistically-distributed set of LTE metrics.
/// Swap in a real modem backend by replacing this function body.
pub fn read(config: &TestConfig) -> Result<serde_json::Value> {
    let mut rng = rand::thread_rng();

    // Typical LTE ranges: RSSI -110..-50 dBm, RSRP ~ RSSI - 20,
    // RSRQ -20..-3 dB, SINR 0..30 dB.
    let rssi_dbm: f64 = rng.gen_range(-110.0..-50.0);
    let rsrp_dbm = rssi_dbm - rng.gen_range(15.0..25.0);
    let rsrq_db: f64 = rng.gen_range(-20.0..-3.0);
    let sinr_db: f64 = rng.gen_range(0.0..30.0);

    let network_type = if sinr_db > 20.0 { "5G" } else { "LTE" };

    Ok(json!({
        "cell_id": config
            .params
            .extra
            .get("cell_id")
            .cloned()
            .unwrap_or(json!("auto")),
        "rssi_dbm": rssi_dbm,
        "rsrp_dbm": rsrp_dbm,
        "rsrq_db": rsrq_db,
        "sinr_db": sinr_db,
        "network_type": network_type,
    }))
}

/// Map an RSSI reading to a 0-100 quality score.
pub fn quality_score(rssi_dbm: f64) -> f64 {
    // -50 dBm or better is full quality, -110 dBm or worse is zero.
    (((rssi_dbm + 110.0) / 60.0) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{TestKind, TestParams};

    #[test]
    fn test_read_produces_lte_fields() {
        let config = crate::probes::TestConfig::new(TestKind::Signal, TestParams::default());
        let value = read(&config).unwrap();
        assert!(value.get("rssi_dbm").is_some());
        assert!(value.get("network_type").is_some());
        let rssi = value["rssi_dbm"].as_f64().unwrap();
        assert!((-110.0..=-50.0).contains(&rssi));
    }

    #[test]
    fn test_quality_score_bounds() {
        assert_eq!(quality_score(-110.0), 0.0);
        assert_eq!(quality_score(-50.0), 100.0);
        assert_eq!(quality_score(-200.0), 0.0);
        assert_eq!(quality_score(0.0), 100.0);
    }
}
