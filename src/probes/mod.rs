//! Test model and sample sources for mobile-network diagnostics.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod api;
pub mod coverage;
pub mod roaming;
pub mod signal;
pub mod speed;

/// Kinds of diagnostic tests the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Speed,
    Signal,
    Coverage,
    Roaming,
    ApiHealth,
    ApiLoad,
}

impl TestKind {
    /// One-shot kinds produce a single terminal sample and complete,
    /// regardless of duration or frequency.
    pub fn is_one_shot(self) -> bool {
        matches!(self, TestKind::Coverage)
    }

    /// Bounded kinds finish after a fixed iteration count (or duration,
    /// whichever comes first).
    pub fn is_bounded(self) -> bool {
        matches!(self, TestKind::ApiLoad)
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestKind::Speed => write!(f, "speed"),
            TestKind::Signal => write!(f, "signal"),
            TestKind::Coverage => write!(f, "coverage"),
            TestKind::Roaming => write!(f, "roaming"),
            TestKind::ApiHealth => write!(f, "api_health"),
            TestKind::ApiLoad => write!(f, "api_load"),
        }
    }
}

impl std::str::FromStr for TestKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "speed" => Ok(TestKind::Speed),
            "signal" => Ok(TestKind::Signal),
            "coverage" => Ok(TestKind::Coverage),
            "roaming" => Ok(TestKind::Roaming),
            "api_health" => Ok(TestKind::ApiHealth),
            "api_load" => Ok(TestKind::ApiLoad),
            other => anyhow::bail!("unknown test kind '{}'", other),
        }
    }
}

/// Kind-specific test parameters. The engine only interprets duration,
/// frequency, and iterations; everything else is owned by the sample source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestParams {
    /// Wall-clock duration of the test in seconds.
    pub duration_sec: f64,
    /// Samples per second (cadence is `1000 / frequency_hz` ms).
    pub frequency_hz: f64,
    /// Iteration cap for bounded kinds.
    pub iterations: Option<u32>,
    /// Probe endpoint (URL or host), where the kind needs one.
    pub target: Option<String>,
    /// Opaque kind-specific payload, passed through to the sample source.
    pub extra: serde_json::Value,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            duration_sec: 30.0,
            frequency_hz: 1.0,
            iterations: None,
            target: None,
            extra: serde_json::Value::Null,
        }
    }
}

impl TestParams {
    /// Interval between sampling ticks. A non-positive frequency falls back
    /// to 1 Hz.
    pub fn tick_interval(&self) -> Duration {
        let freq = if self.frequency_hz > 0.0 {
            self.frequency_hz
        } else {
            1.0
        };
        Duration::from_millis(((1000.0 / freq).max(1.0)).round() as u64)
    }

    /// Total test duration, clamped at zero.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_sec.max(0.0))
    }
}

/// Lifecycle status of a test, as persisted in the result store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Pending => write!(f, "pending"),
            TestStatus::Running => write!(f, "running"),
            TestStatus::Completed => write!(f, "completed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for TestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TestStatus::Pending),
            "running" => Ok(TestStatus::Running),
            "completed" => Ok(TestStatus::Completed),
            "failed" => Ok(TestStatus::Failed),
            "stopped" => Ok(TestStatus::Stopped),
            other => anyhow::bail!("unknown test status '{}'", other),
        }
    }
}

/// A test's configuration and persisted status. Created by the front-end
/// before admission; status transitions are issued by the engine only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub test_id: String,
    pub kind: TestKind,
    pub params: TestParams,
    pub created_at: DateTime<Utc>,
    pub status: TestStatus,
}

impl TestConfig {
    /// Build a new pending config with a fresh UUID test ID.
    pub fn new(kind: TestKind, params: TestParams) -> Self {
        Self {
            test_id: uuid::Uuid::new_v4().to_string(),
            kind,
            params,
            created_at: Utc::now(),
            status: TestStatus::Pending,
        }
    }
}

/// One measurement (or error record) produced by a tick of a test's
/// sampling loop. Append-only; identity is (test_id, seq).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub test_id: String,
    pub kind: TestKind,
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub data: serde_json::Value,
    pub success: bool,
    pub error: Option<String>,
}

impl Sample {
    /// A successful measurement.
    pub fn ok(test_id: &str, kind: TestKind, seq: u64, data: serde_json::Value) -> Self {
        Self {
            test_id: test_id.to_string(),
            kind,
            seq,
            recorded_at: Utc::now(),
            data,
            success: true,
            error: None,
        }
    }

    /// An error-shaped sample: sentinel payload plus the failure message,
    /// recorded instead of losing the tick.
    pub fn failed(test_id: &str, kind: TestKind, seq: u64, error: String) -> Self {
        Self {
            test_id: test_id.to_string(),
            kind,
            seq,
            recorded_at: Utc::now(),
            data: serde_json::Value::Null,
            success: false,
            error: Some(error),
        }
    }
}

/// Trait for all sample sources. The engine treats the payload opaquely.
#[async_trait::async_trait]
pub trait SampleSource: Send + Sync {
    /// Produce one measurement for the given test configuration.
    async fn sample(&self, config: &TestConfig) -> Result<serde_json::Value>;
}

/// Production sample source: dispatches on test kind to the concrete probes.
pub struct ProbeSet {
    http: reqwest::Client,
}

impl ProbeSet {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("netpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl SampleSource for ProbeSet {
    async fn sample(&self, config: &TestConfig) -> Result<serde_json::Value> {
        match config.kind {
            TestKind::Speed => speed::measure(&self.http, config).await,
            TestKind::Signal => signal::read(config),
            TestKind::Coverage => coverage::validate(config),
            TestKind::Roaming => roaming::check(config),
            TestKind::ApiHealth => api::health(&self.http, config).await,
            TestKind::ApiLoad => api::load(&self.http, config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_round_trip() {
        for kind in [
            TestKind::Speed,
            TestKind::Signal,
            TestKind::Coverage,
            TestKind::Roaming,
            TestKind::ApiHealth,
            TestKind::ApiLoad,
        ] {
            let parsed: TestKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!("wifi".parse::<TestKind>().is_err());
    }

    #[test]
    fn test_tick_interval_from_frequency() {
        let params = TestParams {
            frequency_hz: 2.0,
            ..TestParams::default()
        };
        assert_eq!(params.tick_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_tick_interval_bad_frequency_falls_back() {
        let params = TestParams {
            frequency_hz: 0.0,
            ..TestParams::default()
        };
        assert_eq!(params.tick_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_negative_duration_clamped() {
        let params = TestParams {
            duration_sec: -5.0,
            ..TestParams::default()
        };
        assert_eq!(params.duration(), Duration::ZERO);
    }

    #[test]
    fn test_new_config_is_pending_with_unique_id() {
        let a = TestConfig::new(TestKind::Signal, TestParams::default());
        let b = TestConfig::new(TestKind::Signal, TestParams::default());
        assert_eq!(a.status, TestStatus::Pending);
        assert_ne!(a.test_id, b.test_id);
    }

    #[test]
    fn test_error_sample_shape() {
        let s = Sample::failed("t-1", TestKind::Speed, 3, "timeout".into());
        assert!(!s.success);
        assert_eq!(s.data, serde_json::Value::Null);
        assert_eq!(s.error.as_deref(), Some("timeout"));
    }
}
