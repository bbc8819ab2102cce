//! Cron service — persistent scheduler with at-most-once firing.
//!
//! A 1-second ticker scans for due jobs. Selected jobs have their
//! `next_run_at_ms` nil-ed out *under the store lock* (and saved) before any
//! execution starts — that nil-out is the mutual-exclusion point that makes
//! double-firing impossible. Execution then runs outside the lock; results
//! and the recomputed schedule are written back under the lock afterwards.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use picoclaw_core::bus::{MessageBus, OutboundMessage};
use picoclaw_core::utils;

use crate::types::{compute_next_run_from, CronJob, CronStore, JobStatus, ScheduleKind};

/// Scan interval for due jobs.
const TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Callback invoked when a job fires; returns the agent's response text.
pub type OnJobFn = Arc<
    dyn Fn(CronJob) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>> + Send + Sync,
>;

/// Persistent cron scheduler.
pub struct CronService {
    store_path: PathBuf,
    store: Arc<Mutex<CronStore>>,
    bus: Arc<MessageBus>,
    on_job: Arc<Mutex<Option<OnJobFn>>>,
    shutdown: Arc<Notify>,
}

impl CronService {
    /// Create a cron service persisting to `store_path`
    /// (typically `<workspace>/cron/jobs.json`).
    pub fn new(bus: Arc<MessageBus>, store_path: PathBuf) -> Self {
        Self {
            store_path,
            store: Arc::new(Mutex::new(CronStore::new())),
            bus,
            on_job: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Set the job-execution callback.
    pub async fn set_on_job(&self, callback: OnJobFn) {
        *self.on_job.lock().await = Some(callback);
    }

    // ─────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────

    /// Load the store from disk, refreshing `next_run_at_ms` for enabled
    /// jobs that lost theirs (e.g. process died mid-fire).
    pub async fn load(&self) -> anyhow::Result<()> {
        if !self.store_path.exists() {
            debug!(path = %self.store_path.display(), "no cron store file, starting empty");
            return Ok(());
        }

        let data = tokio::fs::read_to_string(&self.store_path).await?;
        let mut loaded: CronStore = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse cron store: {e}"))?;

        let now = utils::now_ms();
        for job in &mut loaded.jobs {
            if job.enabled && job.state.next_run_at_ms.is_none() {
                job.state.next_run_at_ms = compute_next_run_from(&job.schedule, now);
            }
        }

        let mut store = self.store.lock().await;
        *store = loaded;
        info!(jobs = store.jobs.len(), "loaded cron store");
        Ok(())
    }

    async fn save_locked(&self, store: &CronStore) {
        if let Err(e) = utils::atomic_write_json(&self.store_path, store) {
            warn!(error = %e, "failed to persist cron store");
        }
    }

    // ─────────────────────────────────────────
    // Job management
    // ─────────────────────────────────────────

    /// Add a job, computing its first run time. Returns the job id.
    pub async fn add_job(&self, mut job: CronJob) -> String {
        job.state.next_run_at_ms = compute_next_run_from(&job.schedule, utils::now_ms());
        let id = job.id.clone();
        {
            let mut store = self.store.lock().await;
            store.add(job);
            self.save_locked(&store).await;
        }
        info!(id = %id, "added cron job");
        id
    }

    /// Remove a job by id.
    pub async fn remove_job(&self, id: &str) -> bool {
        let removed = {
            let mut store = self.store.lock().await;
            let removed = store.remove(id);
            if removed {
                self.save_locked(&store).await;
            }
            removed
        };
        if removed {
            info!(id = %id, "removed cron job");
        }
        removed
    }

    /// Enable or disable a job; enabling recomputes the next run.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut store = self.store.lock().await;
        let found = match store.find_mut(id) {
            Some(job) => {
                job.enabled = enabled;
                job.updated_at_ms = utils::now_ms();
                job.state.next_run_at_ms = if enabled {
                    compute_next_run_from(&job.schedule, utils::now_ms())
                } else {
                    None
                };
                true
            }
            None => false,
        };
        if found {
            self.save_locked(&store).await;
        }
        found
    }

    /// Snapshot of all jobs.
    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.store.lock().await.jobs.clone()
    }

    /// Snapshot of one job.
    pub async fn get_job(&self, id: &str) -> Option<CronJob> {
        self.store.lock().await.find(id).cloned()
    }

    // ─────────────────────────────────────────
    // Scheduler loop
    // ─────────────────────────────────────────

    /// Run the scheduler until `stop()` is called. Loads the store first.
    pub async fn start(&self) -> anyhow::Result<()> {
        if let Err(e) = self.load().await {
            warn!(error = %e, "failed to load cron store, starting empty");
        }

        info!("cron service started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK) => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("cron service shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Stop the scheduler.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// One scan: claim due jobs under the lock, execute outside it.
    pub async fn tick(&self) {
        let now = utils::now_ms();

        // Phase 1 — claim: nil out next_run_at_ms under the lock and save,
        // so a concurrent scan cannot select the same firing.
        let due: Vec<CronJob> = {
            let mut store = self.store.lock().await;
            let mut claimed = Vec::new();
            for job in &mut store.jobs {
                if job.is_due(now) {
                    job.state.next_run_at_ms = None;
                    claimed.push(job.clone());
                }
            }
            if !claimed.is_empty() {
                self.save_locked(&store).await;
            }
            claimed
        };

        // Phase 2 — execute each claimed job with no lock held.
        for job in due {
            self.execute_job(job).await;
        }
    }

    async fn execute_job(&self, job: CronJob) {
        info!(id = %job.id, name = %job.name, "cron job firing");

        let callback = { self.on_job.lock().await.clone() };
        let result = match callback {
            Some(cb) => cb(job.clone()).await,
            None => Err(anyhow::anyhow!("no job handler configured")),
        };

        // Optional delivery of the result to a channel.
        if let Ok(response) = &result {
            if job.payload.deliver && !response.is_empty() {
                if let (Some(channel), Some(to)) = (&job.payload.channel, &job.payload.to) {
                    self.bus
                        .publish_outbound(OutboundMessage::new(channel, to, response));
                }
            }
        }

        // Phase 3 — write back status and reschedule under the lock.
        let now = utils::now_ms();
        let mut store = self.store.lock().await;

        let delete = job.schedule.kind == ScheduleKind::At && job.delete_after_run;
        if delete {
            store.remove(&job.id);
        } else if let Some(stored) = store.find_mut(&job.id) {
            stored.state.last_run_at_ms = Some(now);
            stored.updated_at_ms = now;
            match &result {
                Ok(_) => {
                    stored.state.last_status = Some(JobStatus::Ok);
                    stored.state.last_error = None;
                }
                Err(e) => {
                    error!(id = %job.id, error = %e, "cron job failed");
                    stored.state.last_status = Some(JobStatus::Error);
                    stored.state.last_error = Some(e.to_string());
                }
            }
            if stored.schedule.kind == ScheduleKind::At {
                // One-shot without delete_after_run: keep the record, stop
                // firing.
                stored.enabled = false;
                stored.state.next_run_at_ms = None;
            } else {
                stored.state.next_run_at_ms = compute_next_run_from(&stored.schedule, now);
            }
        }

        self.save_locked(&store).await;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CronPayload, CronSchedule};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_service(dir: &std::path::Path) -> CronService {
        CronService::new(
            Arc::new(MessageBus::new()),
            dir.join("cron").join("jobs.json"),
        )
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> OnJobFn {
        Arc::new(move |_job| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("done".to_string())
            })
        })
    }

    #[tokio::test]
    async fn test_add_job_computes_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());

        let id = service
            .add_job(CronJob::new(
                "t",
                CronSchedule::every(60_000),
                CronPayload::default(),
            ))
            .await;

        let job = service.get_job(&id).await.unwrap();
        assert!(job.state.next_run_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_add_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        service
            .add_job(CronJob::new(
                "t",
                CronSchedule::every(60_000),
                CronPayload::default(),
            ))
            .await;

        let path = dir.path().join("cron").join("jobs.json");
        assert!(path.exists());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["jobs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_and_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let fired = Arc::new(AtomicUsize::new(0));
        service.set_on_job(counting_handler(fired.clone())).await;

        let mut job = CronJob::new(
            "one-shot",
            CronSchedule::at(utils::now_ms() - 10),
            CronPayload::default(),
        );
        job.delete_after_run = true;
        let id = service.add_job(job).await;

        // First tick fires the job
        service.tick().await;
        // Second tick must not fire it again
        service.tick().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(service.get_job(&id).await.is_none());

        // Removal is persisted
        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("cron").join("jobs.json")).unwrap(),
        )
        .unwrap();
        assert!(raw["jobs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_shot_without_delete_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let fired = Arc::new(AtomicUsize::new(0));
        service.set_on_job(counting_handler(fired.clone())).await;

        let id = service
            .add_job(CronJob::new(
                "one-shot",
                CronSchedule::at(utils::now_ms() - 10),
                CronPayload::default(),
            ))
            .await;

        service.tick().await;
        service.tick().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let job = service.get_job(&id).await.unwrap();
        assert!(!job.enabled);
        assert!(job.state.next_run_at_ms.is_none());
        assert_eq!(job.state.last_status, Some(JobStatus::Ok));
    }

    #[tokio::test]
    async fn test_interval_job_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let fired = Arc::new(AtomicUsize::new(0));
        service.set_on_job(counting_handler(fired.clone())).await;

        let id = service
            .add_job(CronJob::new(
                "interval",
                CronSchedule::every(3_600_000),
                CronPayload::default(),
            ))
            .await;

        // Force it due
        {
            let mut store = service.store.lock().await;
            store.find_mut(&id).unwrap().state.next_run_at_ms = Some(0);
        }

        service.tick().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let job = service.get_job(&id).await.unwrap();
        // Rescheduled into the future
        assert!(job.state.next_run_at_ms.unwrap() > utils::now_ms());
        assert_eq!(job.state.last_status, Some(JobStatus::Ok));
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let handler: OnJobFn =
            Arc::new(|_job| Box::pin(async { Err(anyhow::anyhow!("boom")) }));
        service.set_on_job(handler).await;

        let id = service
            .add_job(CronJob::new(
                "failing",
                CronSchedule::every(3_600_000),
                CronPayload::default(),
            ))
            .await;
        {
            let mut store = service.store.lock().await;
            store.find_mut(&id).unwrap().state.next_run_at_ms = Some(0);
        }

        service.tick().await;

        let job = service.get_job(&id).await.unwrap();
        assert_eq!(job.state.last_status, Some(JobStatus::Error));
        assert!(job.state.last_error.as_deref().unwrap().contains("boom"));
        // Still rescheduled — background services never abort
        assert!(job.state.next_run_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_deliver_publishes_outbound() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus.clone(), dir.path().join("jobs.json"));
        let handler: OnJobFn =
            Arc::new(|_job| Box::pin(async { Ok("the report".to_string()) }));
        service.set_on_job(handler).await;

        let mut job = CronJob::new(
            "report",
            CronSchedule::at(utils::now_ms() - 10),
            CronPayload {
                message: "make a report".into(),
                deliver: true,
                channel: Some("telegram".into()),
                to: Some("chat_7".into()),
                ..Default::default()
            },
        );
        job.delete_after_run = true;
        service.add_job(job).await;

        service.tick().await;

        let outbound = bus.consume_outbound().await.unwrap();
        assert_eq!(outbound.channel, "telegram");
        assert_eq!(outbound.chat_id, "chat_7");
        assert_eq!(outbound.content, "the report");
    }

    #[tokio::test]
    async fn test_disabled_job_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let fired = Arc::new(AtomicUsize::new(0));
        service.set_on_job(counting_handler(fired.clone())).await;

        let id = service
            .add_job(CronJob::new(
                "off",
                CronSchedule::at(utils::now_ms() - 10),
                CronPayload::default(),
            ))
            .await;
        service.set_enabled(&id, false).await;

        service.tick().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_recomputes_missing_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        // A store whose enabled job lost its next_run_at_ms
        let mut store = CronStore::new();
        store.add(CronJob::new(
            "orphan",
            CronSchedule::every(60_000),
            CronPayload::default(),
        ));
        utils::atomic_write_json(&path, &store).unwrap();

        let service = CronService::new(Arc::new(MessageBus::new()), path);
        service.load().await.unwrap();

        let jobs = service.list_jobs().await;
        assert!(jobs[0].state.next_run_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_remove_job() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let id = service
            .add_job(CronJob::new(
                "t",
                CronSchedule::every(60_000),
                CronPayload::default(),
            ))
            .await;

        assert!(service.remove_job(&id).await);
        assert!(!service.remove_job(&id).await);
    }

    #[tokio::test]
    async fn test_stop_exits_loop() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(make_service(dir.path()));

        let svc = service.clone();
        let handle = tokio::spawn(async move { svc.start().await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        service.stop();

        assert!(handle.await.unwrap().is_ok());
    }
}
