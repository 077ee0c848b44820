//! Per-test sampling loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::broadcast::Event;
use crate::probes::{Sample, TestConfig, TestKind, TestStatus};

use super::EngineInner;

/// Drive one test's periodic sampling until its duration (or iteration
/// cap) is exhausted, then perform completion bookkeeping.
///
/// The loop body is sequential, so samples for one test are persisted and
/// broadcast in tick order, and a slow sample can never overlap the next
/// tick -- the interval skips missed ticks instead of queueing them.
pub(crate) async fn run_sampling_loop(inner: Arc<EngineInner>, config: TestConfig) {
    let test_id = config.test_id.clone();
    let kind = config.kind;
    let duration = config.params.duration();
    let iterations = if kind.is_bounded() {
        config.params.iterations.map(u64::from)
    } else {
        None
    };
    let started = Instant::now();

    let mut ticker = tokio::time::interval(config.params.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut seq: u64 = 0;
    loop {
        ticker.tick().await;

        // Duration is checked at tick boundaries only, so a test may
        // overshoot by up to one tick interval. A zero duration completes
        // before the first sample.
        let done = if kind.is_one_shot() {
            seq >= 1
        } else if let Some(max) = iterations {
            seq >= max || started.elapsed() >= duration
        } else {
            started.elapsed() >= duration
        };
        if done {
            break;
        }

        let sample = match inner.source.sample(&config).await {
            Ok(data) => Sample::ok(&test_id, kind, seq, data),
            Err(e) => {
                // One failed sample must not terminate the test.
                warn!(test_id = %test_id, seq, error = %e, "sample failed");
                Sample::failed(&test_id, kind, seq, e.to_string())
            }
        };
        record(&inner, &sample).await;
        seq += 1;

        let mut state = inner.state.write().await;
        if let Some(entry) = state.running.get_mut(&test_id) {
            entry.last_update = Utc::now();
        }
    }

    complete(&inner, &test_id, kind, seq).await;
}

/// Persist and publish one sample. A persistence failure drops the sample
/// and keeps the loop alive.
async fn record(inner: &EngineInner, sample: &Sample) {
    if let Err(e) = inner.store.save_result(sample).await {
        warn!(
            test_id = %sample.test_id,
            seq = sample.seq,
            error = %e,
            "failed to persist sample; dropping"
        );
    }

    let payload = serde_json::to_value(sample).unwrap_or(serde_json::Value::Null);
    inner.broadcaster.publish(Event::new(
        format!("{}_update", sample.kind),
        &sample.test_id,
        payload,
    ));
}

/// Completion bookkeeping: remove self from the running-table, account
/// stats, persist the final status, and announce completion exactly once.
/// If an explicit stop raced the loop and won, the entry is already gone
/// and the stop path owns the bookkeeping.
async fn complete(inner: &EngineInner, test_id: &str, kind: TestKind, samples: u64) {
    let removed = {
        let mut state = inner.state.write().await;
        let entry = state.running.remove(test_id);
        if let Some(entry) = &entry {
            state.stats.tests_succeeded += 1;
            state.stats.total_runtime += entry.started_instant.elapsed();
        }
        entry.is_some()
    };
    if !removed {
        return;
    }

    if let Err(e) = inner.store.update_status(test_id, TestStatus::Completed).await {
        warn!(test_id, error = %e, "failed to persist completed status");
    }
    inner.broadcaster.publish(Event::new(
        format!("{kind}_complete"),
        test_id,
        serde_json::json!({ "samples": samples }),
    ));
    info!(test_id, kind = %kind, samples, "test completed");
}
