//! Cron-style recurring test schedules.
//!
//! Schedules live in SQLite next to the test history. A polling loop checks
//! for due schedules and admits them into the lifecycle engine like any
//! front-end caller; the engine tracks the loop's handle and releases it at
//! shutdown.

pub mod profiles;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::probes::{TestConfig, TestKind, TestParams};
use crate::storage::{Pool, ResultStore};

/// A named recurring test definition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub cron_expr: String,
    pub kind: TestKind,
    pub params: TestParams,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// SQLite-backed registry of recurring schedules.
#[derive(Clone)]
pub struct Scheduler {
    pool: Pool,
}

impl Scheduler {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Add a new schedule. The cron expression (seconds field included) is
    /// validated up front.
    pub async fn add(
        &self,
        name: &str,
        cron_expr: &str,
        kind: TestKind,
        params: &TestParams,
    ) -> Result<()> {
        let _ = CronSchedule::from_str(cron_expr)
            .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", cron_expr, e))?;
        let params_json =
            serde_json::to_string(params).context("failed to serialize schedule params")?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO schedules (name, cron_expr, kind, params_json, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![
                name,
                cron_expr,
                kind.to_string(),
                params_json,
                Utc::now().to_rfc3339()
            ],
        )
        .context("failed to insert schedule")?;

        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "DELETE FROM schedules WHERE name = ?1",
            rusqlite::params![name],
        )?;
        if changed == 0 {
            anyhow::bail!("schedule '{}' not found", name);
        }
        Ok(())
    }

    /// List all schedules.
    pub async fn list(&self) -> Result<Vec<ScheduleEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT name, cron_expr, kind, params_json, enabled, created_at, last_run_at
             FROM schedules ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)? != 0,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (name, cron_expr, kind, params_json, enabled, created_at, last_run_at) = row?;
            entries.push(ScheduleEntry {
                name,
                cron_expr,
                kind: kind.parse()?,
                params: serde_json::from_str(&params_json)
                    .context("failed to deserialize schedule params")?,
                enabled,
                created_at: parse_timestamp(&created_at)?,
                last_run_at: last_run_at.as_deref().map(parse_timestamp).transpose()?,
            });
        }
        Ok(entries)
    }

    /// Preview upcoming runs in the next `hours`, sorted by time.
    /// Strictly a dry-run; never mutates last-run bookkeeping.
    pub async fn preview_next_runs(&self, hours: u64) -> Result<Vec<(String, String, String)>> {
        let now = Utc::now();
        let end = now + chrono::Duration::hours(hours as i64);
        let mut preview = Vec::new();

        for entry in self.list().await? {
            if !entry.enabled {
                continue;
            }
            if let Ok(schedule) = CronSchedule::from_str(&entry.cron_expr) {
                for next_time in schedule.after(&now) {
                    if next_time > end {
                        break;
                    }
                    preview.push((
                        next_time.to_rfc3339(),
                        entry.name.clone(),
                        entry.kind.to_string(),
                    ));
                }
            }
        }

        preview.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(preview)
    }

    /// Enabled schedules whose next occurrence after their last run (or
    /// creation, if they never ran) is in the past.
    pub async fn due_schedules(&self) -> Result<Vec<ScheduleEntry>> {
        let now = Utc::now();
        let mut due = Vec::new();

        for entry in self.list().await? {
            if !entry.enabled {
                continue;
            }
            let Ok(schedule) = CronSchedule::from_str(&entry.cron_expr) else {
                warn!(schedule = %entry.name, cron = %entry.cron_expr, "skipping unparseable cron expression");
                continue;
            };
            let anchor = entry.last_run_at.unwrap_or(entry.created_at);
            if let Some(next) = schedule.after(&anchor).next() {
                if next <= now {
                    due.push(entry);
                }
            }
        }
        Ok(due)
    }

    /// Record that a schedule fired. Called before launching the test to
    /// prevent double-scheduling.
    pub async fn mark_ran(&self, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE schedules SET last_run_at = ?2 WHERE name = ?1",
            rusqlite::params![name, Utc::now().to_rfc3339()],
        )
        .context("failed to update schedule last run")?;
        Ok(())
    }

    /// Seed the default out-of-box schedules when the table is empty.
    pub async fn seed_defaults(&self) -> Result<()> {
        if !self.list().await?.is_empty() {
            return Ok(());
        }
        for profile in profiles::defaults() {
            self.add(
                &profile.name,
                &profile.cron_expr,
                profile.kind,
                &profile.params,
            )
            .await?;
        }
        info!("seeded default schedules");
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid schedule timestamp '{}'", value))?
        .with_timezone(&Utc))
}

/// Scheduler execution loop: polls for due schedules every 10 seconds and
/// admits them into the engine.
pub async fn run_scheduler_loop(
    scheduler: Scheduler,
    engine: Arc<Engine>,
    store: Arc<dyn ResultStore>,
) {
    info!("scheduler loop started");

    let mut interval = tokio::time::interval(Duration::from_secs(10));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let due = match scheduler.due_schedules().await {
            Ok(due) => due,
            Err(e) => {
                error!("failed to check due schedules: {}", e);
                continue;
            }
        };

        for entry in due {
            // Mark as run BEFORE execution to prevent double-scheduling.
            if let Err(e) = scheduler.mark_ran(&entry.name).await {
                error!(schedule = %entry.name, "failed to update last run: {}", e);
                continue;
            }

            let config = TestConfig::new(entry.kind, entry.params.clone());
            if let Err(e) = store.save_config(&config).await {
                error!(schedule = %entry.name, "failed to persist scheduled test config: {}", e);
                continue;
            }

            match engine.start(config).await {
                Ok(admission) => {
                    info!(schedule = %entry.name, ?admission, "scheduled test admitted");
                }
                Err(e) => {
                    warn!(schedule = %entry.name, "scheduled test rejected: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_pool;

    fn temp_scheduler() -> (tempfile::TempDir, Scheduler) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler-test.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, Scheduler::new(pool))
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let (_dir, scheduler) = temp_scheduler();
        scheduler
            .add(
                "nightly-speed",
                "0 0 3 * * *",
                TestKind::Speed,
                &TestParams::default(),
            )
            .await
            .unwrap();

        let entries = scheduler.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "nightly-speed");
        assert_eq!(entries[0].kind, TestKind::Speed);
        assert!(entries[0].enabled);
        assert!(entries[0].last_run_at.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        let (_dir, scheduler) = temp_scheduler();
        let err = scheduler
            .add("bad", "not a cron", TestKind::Signal, &TestParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid cron expression"));
        assert!(scheduler.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (_dir, scheduler) = temp_scheduler();
        scheduler
            .add("dup", "0 0 3 * * *", TestKind::Speed, &TestParams::default())
            .await
            .unwrap();
        assert!(scheduler
            .add("dup", "0 0 4 * * *", TestKind::Signal, &TestParams::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_remove_unknown_errors() {
        let (_dir, scheduler) = temp_scheduler();
        assert!(scheduler.remove("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_due_after_anchor_passes() {
        let (_dir, scheduler) = temp_scheduler();
        scheduler
            .add(
                "every-second",
                "* * * * * *",
                TestKind::Signal,
                &TestParams::default(),
            )
            .await
            .unwrap();

        // Fresh schedule anchored at creation: not due yet.
        assert!(scheduler.due_schedules().await.unwrap().is_empty());

        // Push the anchor into the past; the next occurrence is now due.
        let past = (Utc::now() - chrono::Duration::seconds(30)).to_rfc3339();
        let conn = scheduler.pool.get().unwrap();
        conn.execute(
            "UPDATE schedules SET created_at = ?1 WHERE name = 'every-second'",
            rusqlite::params![past],
        )
        .unwrap();

        let due = scheduler.due_schedules().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "every-second");
    }

    #[tokio::test]
    async fn test_mark_ran_defers_next_run() {
        let (_dir, scheduler) = temp_scheduler();
        scheduler
            .add(
                "hourly",
                "0 0 * * * *",
                TestKind::Roaming,
                &TestParams::default(),
            )
            .await
            .unwrap();

        scheduler.mark_ran("hourly").await.unwrap();
        let entries = scheduler.list().await.unwrap();
        assert!(entries[0].last_run_at.is_some());
        // Anchored at just-now: the next hourly slot is in the future.
        assert!(scheduler.due_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preview_is_sorted_and_bounded() {
        let (_dir, scheduler) = temp_scheduler();
        scheduler
            .add(
                "quarter-hourly",
                "0 */15 * * * *",
                TestKind::Signal,
                &TestParams::default(),
            )
            .await
            .unwrap();

        let preview = scheduler.preview_next_runs(1).await.unwrap();
        assert!(!preview.is_empty());
        assert!(preview.len() <= 5);
        let times: Vec<&String> = preview.iter().map(|(t, _, _)| t).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[tokio::test]
    async fn test_seed_defaults_once() {
        let (_dir, scheduler) = temp_scheduler();
        scheduler.seed_defaults().await.unwrap();
        let first = scheduler.list().await.unwrap().len();
        assert!(first > 0);

        scheduler.seed_defaults().await.unwrap();
        assert_eq!(scheduler.list().await.unwrap().len(), first);
    }
}
