//! Background threshold monitor.
//!
//! Watches queue depth, cap pressure, and process memory on a fixed
//! interval and emits advisory warnings through the log and the
//! broadcaster. Advisory only: never fatal, never mutates engine state.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{get_current_pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::broadcast::Event;

use super::EngineInner;

pub(crate) async fn run_monitor(inner: Arc<EngineInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut system = System::new();
    let pid = get_current_pid().ok();

    loop {
        ticker.tick().await;

        let (running, queued) = {
            let state = inner.state.read().await;
            (state.running.len(), state.queue.len())
        };
        let cap = inner.max_concurrent.load(Ordering::Relaxed);

        if queued >= inner.config.queue_depth_warn {
            warn!(
                queued,
                threshold = inner.config.queue_depth_warn,
                "admission queue depth high"
            );
            advisory(
                &inner,
                "queue_depth",
                serde_json::json!({ "queued": queued }),
            );
        }

        if cap > 0 && running * 10 >= cap * 9 {
            warn!(running, cap, "running count near concurrency cap");
            advisory(
                &inner,
                "cap_pressure",
                serde_json::json!({ "running": running, "cap": cap }),
            );
        }

        if let Some(pid) = pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = system.process(pid) {
                let rss_mb = process.memory() / (1024 * 1024);
                if rss_mb >= inner.config.memory_warn_mb {
                    warn!(
                        rss_mb,
                        threshold = inner.config.memory_warn_mb,
                        "process memory high"
                    );
                    advisory(&inner, "memory", serde_json::json!({ "rss_mb": rss_mb }));
                }
            }
        }

        debug!(running, queued, "engine monitor tick");
    }
}

fn advisory(inner: &EngineInner, reason: &str, mut data: serde_json::Value) {
    if let Some(obj) = data.as_object_mut() {
        obj.insert("reason".to_string(), serde_json::json!(reason));
    }
    inner
        .broadcaster
        .publish(Event::new("engine_warning", "engine", data));
}
