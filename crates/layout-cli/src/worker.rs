//! Batch job worker.
//!
//! Jobs come from a manifest. Each job id is run at most once to
//! completion: the status store is persisted after every transition, and
//! completed ids are skipped when the batch is run again.

use crate::backoff::Backoff;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use layout_core::{ErrorClass, GenerationRequest, LayoutEngine, LayoutError, LayoutResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub jobs: Vec<JobSpec>,
}

impl BatchManifest {
    /// Relative request paths resolve against the manifest's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let mut manifest: BatchManifest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for job in &mut manifest.jobs {
            if job.request.is_relative() {
                job.request = base.join(&job.request);
            }
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub request: PathBuf,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
}

impl JobRecord {
    fn pending(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            updated_at: Utc::now(),
            output: None,
            error: None,
            error_class: None,
        }
    }
}

/// Job status store, optionally mirrored to a JSON state file.
pub struct JobStore {
    jobs: DashMap<String, JobRecord>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl JobStore {
    pub fn in_memory() -> Self {
        Self {
            jobs: DashMap::new(),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the state file if present. Jobs left `processing` by an
    /// interrupted run go back to `pending`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs = DashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading job state {}", path.display()))?;
            let records: Vec<JobRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing job state {}", path.display()))?;
            for mut record in records {
                if record.status == JobStatus::Processing {
                    tracing::warn!(job = %record.id, "stale processing job reset to pending");
                    record.status = JobStatus::Pending;
                }
                jobs.insert(record.id.clone(), record);
            }
        }
        Ok(Self {
            jobs,
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Records sorted by id.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Mark a job processing. Returns false when it already completed or
    /// another task holds it.
    pub fn claim(&self, id: &str) -> bool {
        let mut entry = self
            .jobs
            .entry(id.to_string())
            .or_insert_with(|| JobRecord::pending(id));
        if matches!(entry.status, JobStatus::Completed | JobStatus::Processing) {
            return false;
        }
        entry.status = JobStatus::Processing;
        entry.error = None;
        entry.error_class = None;
        entry.updated_at = Utc::now();
        true
    }

    pub fn record_attempt(&self, id: &str) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.attempts += 1;
            entry.updated_at = Utc::now();
        }
    }

    pub fn complete(&self, id: &str, output: PathBuf) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.status = JobStatus::Completed;
            entry.output = Some(output);
            entry.updated_at = Utc::now();
        }
    }

    pub fn fail(&self, id: &str, error: String, class: ErrorClass) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.status = JobStatus::Failed;
            entry.error = Some(error);
            entry.error_class = Some(class);
            entry.updated_at = Utc::now();
        }
    }

    /// Write the state file atomically (temp file + rename).
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("job state writer poisoned"))?;
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub job_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(ErrorClass),
    /// Already completed, held elsewhere, or not started because of shutdown
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Class of the first failed job in manifest order
    pub first_failure: Option<ErrorClass>,
}

pub struct Worker {
    engine: Arc<LayoutEngine>,
    store: Arc<JobStore>,
    settings: WorkerSettings,
    stopping: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(engine: Arc<LayoutEngine>, store: Arc<JobStore>, settings: WorkerSettings) -> Self {
        Self {
            engine,
            store,
            settings,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops new jobs from starting; running jobs finish.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stopping.clone()
    }

    pub async fn run(&self, jobs: Vec<JobSpec>) -> Result<BatchSummary> {
        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .with_context(|| format!("creating {}", self.settings.output_dir.display()))?;
        let concurrency = self.settings.concurrency.max(1);
        tracing::info!(jobs = jobs.len(), concurrency, "batch started");

        let mut outcomes: Vec<(usize, JobOutcome)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| async move { (index, self.run_job(job).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut summary = BatchSummary::default();
        for (_, outcome) in outcomes {
            match outcome {
                JobOutcome::Completed => summary.completed += 1,
                JobOutcome::Skipped => summary.skipped += 1,
                JobOutcome::Failed(class) => {
                    summary.failed += 1;
                    summary.first_failure.get_or_insert(class);
                }
            }
        }
        self.store.persist()?;
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "batch finished"
        );
        Ok(summary)
    }

    async fn run_job(&self, job: JobSpec) -> JobOutcome {
        if self.stopping.load(Ordering::SeqCst) {
            return JobOutcome::Skipped;
        }
        if !self.store.claim(&job.id) {
            tracing::info!(job = %job.id, "job already handled, skipping");
            return JobOutcome::Skipped;
        }
        self.persist_logged();

        let outcome = match self.execute(&job).await {
            Ok(output) => {
                tracing::info!(job = %job.id, output = %output.display(), "job completed");
                self.store.complete(&job.id, output);
                JobOutcome::Completed
            }
            Err(err) => {
                let class = err
                    .downcast_ref::<LayoutError>()
                    .map(LayoutError::class)
                    .unwrap_or(ErrorClass::InvalidInput);
                tracing::error!(job = %job.id, ?class, "job failed: {:#}", err);
                self.store.fail(&job.id, format!("{:#}", err), class);
                JobOutcome::Failed(class)
            }
        };
        self.persist_logged();
        outcome
    }

    async fn execute(&self, job: &JobSpec) -> Result<PathBuf> {
        let raw = tokio::fs::read_to_string(&job.request)
            .await
            .with_context(|| format!("reading request {}", job.request.display()))?;
        let mut request: GenerationRequest = serde_json::from_str(&raw)
            .with_context(|| format!("parsing request {}", job.request.display()))?;
        if let Some(strategy) = &job.strategy {
            request.strategy = strategy.clone();
        }

        let mut backoff = Backoff::new(self.settings.backoff_base, self.settings.backoff_max);
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            self.store.record_attempt(&job.id);
            match self.generate_once(request.clone()).await {
                Ok(result) => break result,
                Err(err) if err.is_retryable() && attempt <= self.settings.max_retries => {
                    let delay = backoff.fail();
                    tracing::warn!(
                        job = %job.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "job hit its deadline, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let output = self.settings.output_dir.join(format!("{}.json", job.id));
        let json = serde_json::to_vec_pretty(&result)?;
        tokio::fs::write(&output, json)
            .await
            .with_context(|| format!("writing {}", output.display()))?;
        Ok(output)
    }

    /// One generation on the blocking pool under a wall-clock deadline,
    /// enforced both between stages and around the whole task.
    async fn generate_once(&self, request: GenerationRequest) -> Result<LayoutResult, LayoutError> {
        let engine = self.engine.clone();
        let timeout = self.settings.job_timeout;
        let deadline = Instant::now() + timeout;
        let task = tokio::task::spawn_blocking(move || {
            engine.generate_with_hook(&request, |stage| {
                if Instant::now() >= deadline {
                    Err(LayoutError::DeadlineExceeded { stage })
                } else {
                    Ok(())
                }
            })
        });
        join_within(task, timeout + Duration::from_millis(250)).await
    }

    fn persist_logged(&self) {
        if let Err(err) = self.store.persist() {
            tracing::error!("failed to persist job state: {:#}", err);
        }
    }
}

/// Await a generation task for up to `grace`. A task still running after
/// that is awaited anyway, so its blocking thread is free before any retry
/// starts, and the run is reported as past its deadline.
async fn join_within<T>(
    mut task: JoinHandle<Result<T, LayoutError>>,
    grace: Duration,
) -> Result<T, LayoutError> {
    let joined = match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "generation overran its deadline; waiting for it to stop"
            );
            match task.await {
                Ok(Ok(_)) => {
                    return Err(LayoutError::DeadlineExceeded {
                        stage: layout_core::Stage::Earthwork,
                    })
                }
                other => other,
            }
        }
    };
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(LayoutError::InvariantViolation(format!(
            "generation task aborted: {}",
            join_err
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout_core::{EngineConfig, FlagKind};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "layout-worker-{}-{}-{}",
            name,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_request(dir: &Path, name: &str, target_kw: f64) -> PathBuf {
        let mut request = crate::demo::demo_request(crate::demo::DemoTerrain::Flat, 300.0, 5.0).unwrap();
        request.target_capacity_kw = target_kw;
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string(&request).unwrap()).unwrap();
        path
    }

    fn settings(dir: &Path, timeout: Duration) -> WorkerSettings {
        WorkerSettings {
            concurrency: 2,
            job_timeout: timeout,
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            output_dir: dir.join("out"),
        }
    }

    fn engine() -> Arc<LayoutEngine> {
        Arc::new(LayoutEngine::new(EngineConfig::default()).unwrap())
    }

    #[test]
    fn stale_processing_jobs_reopen_as_pending() {
        let dir = scratch_dir("reopen");
        let path = dir.join("state.json");
        let store = JobStore::open(&path).unwrap();
        assert!(store.claim("a"));
        assert!(store.claim("b"));
        store.complete("b", PathBuf::from("b.json"));
        store.persist().unwrap();

        let reopened = JobStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap().status, JobStatus::Pending);
        assert_eq!(reopened.get("b").unwrap().status, JobStatus::Completed);
        assert!(reopened.claim("a"));
        assert!(!reopened.claim("b"));
        assert!(!reopened.claim("a"));
    }

    #[tokio::test]
    async fn overrunning_generation_is_joined_before_returning() {
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let task = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(150));
            done.store(true, Ordering::SeqCst);
            Ok::<u32, LayoutError>(7)
        });
        let err = join_within(task, Duration::from_millis(20)).await.unwrap_err();
        assert!(finished.load(Ordering::SeqCst));
        assert!(err.is_retryable());

        let quick = tokio::task::spawn_blocking(|| Ok::<u32, LayoutError>(7));
        assert_eq!(join_within(quick, Duration::from_secs(5)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn completed_jobs_are_not_rerun() {
        let dir = scratch_dir("rerun");
        let request = write_request(&dir, "site.json", 1000.0);
        let store = Arc::new(JobStore::open(dir.join("state.json")).unwrap());
        let worker = Worker::new(engine(), store.clone(), settings(&dir, Duration::from_secs(60)));
        let jobs = vec![JobSpec {
            id: "site-a".to_string(),
            request,
            strategy: None,
        }];

        let first = worker.run(jobs.clone()).await.unwrap();
        assert_eq!(first.completed, 1);
        let record = store.get("site-a").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 1);
        let output = record.output.unwrap();
        let result: LayoutResult =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(result.flags_of(FlagKind::OrphanAsset).count(), 0);

        let second = worker.run(jobs).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.completed, 0);
        assert_eq!(store.get("site-a").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn invalid_input_fails_without_retry() {
        let dir = scratch_dir("invalid");
        let request = write_request(&dir, "bad.json", -10.0);
        let store = Arc::new(JobStore::in_memory());
        let worker = Worker::new(engine(), store.clone(), settings(&dir, Duration::from_secs(60)));
        let summary = worker
            .run(vec![JobSpec {
                id: "bad".to_string(),
                request,
                strategy: None,
            }])
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.first_failure, Some(ErrorClass::InvalidInput));
        let record = store.get("bad").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn deadline_failures_retry_then_fail() {
        let dir = scratch_dir("deadline");
        let request = write_request(&dir, "site.json", 1000.0);
        let store = Arc::new(JobStore::in_memory());
        let worker = Worker::new(engine(), store.clone(), settings(&dir, Duration::ZERO));
        let summary = worker
            .run(vec![JobSpec {
                id: "slow".to_string(),
                request,
                strategy: Some("low_earthwork".to_string()),
            }])
            .await
            .unwrap();
        assert_eq!(summary.first_failure, Some(ErrorClass::Retryable));
        let record = store.get("slow").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test]
    async fn stop_flag_leaves_jobs_pending() {
        let dir = scratch_dir("stop");
        let request = write_request(&dir, "site.json", 1000.0);
        let store = Arc::new(JobStore::in_memory());
        let worker = Worker::new(engine(), store.clone(), settings(&dir, Duration::from_secs(60)));
        worker.stop_handle().store(true, Ordering::SeqCst);
        let summary = worker
            .run(vec![JobSpec {
                id: "later".to_string(),
                request,
                strategy: None,
            }])
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(store.get("later").is_none());
    }
}
