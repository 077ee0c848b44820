//! Default schedule profiles.

use serde_json::Value;

use crate::probes::{TestKind, TestParams};

/// A default schedule definition, installed on first start.
pub struct Profile {
    pub name: String,
    pub cron_expr: String,
    pub kind: TestKind,
    pub params: TestParams,
}

/// Return the default out-of-box schedules. Cron expressions carry a
/// seconds field.
pub fn defaults() -> Vec<Profile> {
    vec![
        Profile {
            name: "signal-watch".to_string(),
            cron_expr: "0 */15 * * * *".to_string(), // every 15 minutes
            kind: TestKind::Signal,
            params: TestParams {
                duration_sec: 60.0,
                frequency_hz: 1.0,
                ..TestParams::default()
            },
        },
        Profile {
            name: "api-health-check".to_string(),
            cron_expr: "0 5 * * * *".to_string(), // hourly, at :05
            kind: TestKind::ApiHealth,
            params: TestParams {
                duration_sec: 30.0,
                frequency_hz: 0.5,
                target: Some("https://connectivitycheck.gstatic.com/generate_204".to_string()),
                ..TestParams::default()
            },
        },
        Profile {
            name: "daily-speed-test".to_string(),
            cron_expr: "0 0 3 * * *".to_string(), // 3am daily
            kind: TestKind::Speed,
            params: TestParams {
                duration_sec: 30.0,
                frequency_hz: 0.2,
                ..TestParams::default()
            },
        },
        Profile {
            name: "roaming-check".to_string(),
            cron_expr: "0 0 */6 * * *".to_string(), // every 6 hours
            kind: TestKind::Roaming,
            params: TestParams {
                duration_sec: 10.0,
                frequency_hz: 0.5,
                ..TestParams::default()
            },
        },
        Profile {
            name: "weekly-coverage".to_string(),
            cron_expr: "0 0 4 * * Sun".to_string(), // 4am Sunday
            kind: TestKind::Coverage,
            params: TestParams {
                duration_sec: 0.0,
                frequency_hz: 1.0,
                extra: Value::Null,
                ..TestParams::default()
            },
        },
    ]
}
