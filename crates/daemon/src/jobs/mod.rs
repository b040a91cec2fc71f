use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{now_timestamp, Database};
use crate::error::{VideoError, VideoResult};
use crate::images::ImageStore;
use crate::profiles::ProfileService;

pub mod worker;

pub const RESTART_INTERRUPT_ERROR: &str = "Video generation interrupted by restart";

/// How long the worker blocks on the queue before re-checking shutdown.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);
/// Bound on joining the worker at shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Running,
    Encoding,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Encoding => "encoding",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    fn parse(s: &str) -> VideoResult<Self> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "encoding" => Ok(JobStatus::Encoding),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(VideoError::service(format!("unknown job status '{other}'"))),
        }
    }
}

/// The generate request as submitted over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoGenerateRequest {
    pub profile_id: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

/// The effective request persisted with the job. Fields stay optional so
/// rows written before a config change (or by hand) still hydrate; the
/// worker re-applies defaults when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub profile_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub output_video_id: Option<String>,
    pub request: JobRequest,
    pub cancel_requested: bool,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

const JOB_COLUMNS: &str = "id, profile_id, status, progress, error, output_video_id, \
     request_json, cancel_requested, created_at, updated_at, started_at, ended_at";

/// Raw column values; status and request still need parsing.
struct JobRow {
    id: String,
    profile_id: String,
    status: String,
    progress: f64,
    error: Option<String>,
    output_video_id: Option<String>,
    request_json: String,
    cancel_requested: bool,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(JobRow {
            id: row.get(0)?,
            profile_id: row.get(1)?,
            status: row.get(2)?,
            progress: row.get(3)?,
            error: row.get(4)?,
            output_video_id: row.get(5)?,
            request_json: row.get(6)?,
            cancel_requested: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            started_at: row.get(10)?,
            ended_at: row.get(11)?,
        })
    }

    fn into_job(self) -> VideoResult<Job> {
        Ok(Job {
            status: JobStatus::parse(&self.status)?,
            request: serde_json::from_str(&self.request_json)?,
            id: self.id,
            profile_id: self.profile_id,
            progress: self.progress,
            error: self.error,
            output_video_id: self.output_video_id,
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

/// Owns the backlog, the single worker, and the live subprocess map. All job
/// state transitions except the waiting→cancelled pre-empt run on the worker.
pub struct JobScheduler {
    pub(crate) db: Arc<Database>,
    pub(crate) config: Arc<AppConfig>,
    pub(crate) profiles: Arc<ProfileService>,
    pub(crate) images: Arc<dyn ImageStore>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    stop_flag: AtomicBool,
    active_processes: Mutex<HashMap<String, Arc<Mutex<Child>>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(
        db: Arc<Database>,
        config: Arc<AppConfig>,
        profiles: Arc<ProfileService>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        JobScheduler {
            db,
            config,
            profiles,
            images,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            stop_flag: AtomicBool::new(false),
            active_processes: Mutex::new(HashMap::new()),
            worker_handle: Mutex::new(None),
        }
    }

    /// Recover persisted state and launch the worker. Jobs left in
    /// `running`/`encoding` by an earlier process have no live encoder, so
    /// they become `error`; `waiting` jobs re-enter the backlog in creation
    /// order.
    pub fn start(self: Arc<Self>) -> VideoResult<()> {
        std::fs::create_dir_all(&self.config.outputs_dir)?;
        std::fs::create_dir_all(&self.config.temp_dir)?;

        let waiting_ids = self.db.transaction(|tx| {
            let now = now_timestamp();
            tx.execute(
                "UPDATE video_jobs
                 SET status = ?1,
                     error = CASE WHEN error IS NULL THEN ?2 ELSE error END,
                     ended_at = COALESCE(ended_at, ?3),
                     updated_at = ?3
                 WHERE status IN (?4, ?5)",
                params![
                    JobStatus::Error.as_str(),
                    RESTART_INTERRUPT_ERROR,
                    now,
                    JobStatus::Running.as_str(),
                    JobStatus::Encoding.as_str()
                ],
            )?;

            let mut stmt = tx.prepare(
                "SELECT id FROM video_jobs WHERE status = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![JobStatus::Waiting.as_str()], |row| {
                row.get::<_, String>(0)
            })?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })?;

        for id in waiting_ids {
            let _ = self.queue_tx.send(id);
        }

        self.stop_flag.store(false, Ordering::SeqCst);

        let rx = self
            .queue_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| VideoError::service("job worker is already running"))?;
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            worker::run_worker(scheduler, rx).await;
        });
        *self.worker_handle.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Signal shutdown, terminate live encoders, and join the worker with a
    /// bounded wait. In-flight jobs surface as `error` on the next start.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let actives: Vec<(String, Arc<Mutex<Child>>)> = self
            .active_processes
            .lock()
            .unwrap()
            .iter()
            .map(|(id, child)| (id.clone(), child.clone()))
            .collect();
        for (job_id, child) in actives {
            if child.lock().unwrap().start_kill().is_err() {
                warn!("Failed to terminate ffmpeg process for job {job_id}");
            }
        }

        let handle = self.worker_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!("Video worker did not stop within {STOP_TIMEOUT:?}");
            }
        }
    }

    pub fn create_job(&self, req: VideoGenerateRequest) -> VideoResult<Job> {
        validate_request(&req)?;

        let profile = self.profiles.get(&req.profile_id)?;
        self.profiles
            .validate_mode(profile.mode, profile.consent_checked)?;
        if profile.reference_images.is_empty() {
            return Err(VideoError::validation(
                "The profile has no reference images",
            ));
        }

        let request = JobRequest {
            prompt: req.prompt,
            negative_prompt: req.negative_prompt,
            duration_sec: Some(
                req.duration_sec
                    .unwrap_or(self.config.default_duration_sec),
            ),
            fps: Some(req.fps.unwrap_or(self.config.default_fps)),
            width: Some(req.width),
            height: Some(req.height),
        };

        let job_id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let request_json = serde_json::to_string(&request)?;
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO video_jobs (
                    id, profile_id, status, progress, error, output_video_id,
                    request_json, cancel_requested, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, 0, NULL, NULL, ?4, 0, ?5, ?5)",
                params![
                    job_id,
                    req.profile_id,
                    JobStatus::Waiting.as_str(),
                    request_json,
                    now
                ],
            )?;
            Ok(())
        })?;

        if self.queue_tx.send(job_id.clone()).is_err() {
            warn!("Job queue is closed; job {job_id} will run after restart");
        }
        self.get_job(&job_id)
    }

    pub fn list_jobs(&self) -> VideoResult<Vec<Job>> {
        self.db.transaction(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM video_jobs ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], JobRow::from_row)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row?.into_job()?);
            }
            Ok(jobs)
        })
    }

    pub fn get_job(&self, job_id: &str) -> VideoResult<Job> {
        self.db.transaction(|tx| {
            let row = tx
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM video_jobs WHERE id = ?1"),
                    params![job_id],
                    JobRow::from_row,
                )
                .optional()?;
            let row = row.ok_or_else(|| {
                VideoError::not_found(format!("Video job '{job_id}' not found"))
            })?;
            row.into_job()
        })
    }

    /// Cooperative cancel. Terminal jobs are a no-op; waiting jobs flip to
    /// `cancelled` right here; anything with a live encoder gets the durable
    /// flag plus a termination signal through the process map.
    pub fn cancel_job(&self, job_id: &str) -> VideoResult<()> {
        let job = self.get_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(());
        }

        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE video_jobs SET cancel_requested = 1, updated_at = ?1 WHERE id = ?2",
                params![now, job_id],
            )?;
            if job.status == JobStatus::Waiting {
                tx.execute(
                    "UPDATE video_jobs
                     SET status = ?1, progress = 0, ended_at = ?2, updated_at = ?2
                     WHERE id = ?3",
                    params![JobStatus::Cancelled.as_str(), now, job_id],
                )?;
            }
            Ok(())
        })?;

        if job.status == JobStatus::Waiting {
            self.cleanup_temp(job_id);
        }

        let child = self.active_processes.lock().unwrap().get(job_id).cloned();
        if let Some(child) = child {
            if child.lock().unwrap().start_kill().is_err() {
                warn!("Failed to terminate job process for '{job_id}'");
            }
            info!("Sent termination signal to encoder for job {job_id}");
        }

        Ok(())
    }

    /// The durable cancellation flag. A missing row reads as cancelled so a
    /// job whose profile was deleted mid-flight stops instead of completing.
    pub(crate) fn is_cancel_requested(&self, job_id: &str) -> VideoResult<bool> {
        self.db.transaction(|tx| {
            let row: Option<bool> = tx
                .query_row(
                    "SELECT cancel_requested FROM video_jobs WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row.unwrap_or(true))
        })
    }

    pub(crate) fn transition_running(&self, job_id: &str) -> VideoResult<()> {
        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE video_jobs
                 SET status = ?1, progress = 5.0, error = NULL, started_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![JobStatus::Running.as_str(), now, job_id],
            )?;
            Ok(())
        })
    }

    pub(crate) fn transition_encoding(&self, job_id: &str) -> VideoResult<()> {
        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE video_jobs SET status = ?1, progress = 30.0, updated_at = ?2 WHERE id = ?3",
                params![JobStatus::Encoding.as_str(), now, job_id],
            )?;
            Ok(())
        })
    }

    /// Heartbeat write; guarded so a late tick can never touch a terminal row.
    pub(crate) fn update_job_progress(&self, job_id: &str, progress: f64) -> VideoResult<()> {
        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE video_jobs
                 SET progress = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN (?4, ?5)",
                params![
                    progress,
                    now,
                    job_id,
                    JobStatus::Running.as_str(),
                    JobStatus::Encoding.as_str()
                ],
            )?;
            Ok(())
        })
    }

    /// Insert the asset row and finish the job in one transaction so
    /// `status`, `progress`, `output_video_id` and `ended_at` can never
    /// disagree.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn complete_job(
        &self,
        job_id: &str,
        output_filename: &str,
        output_path: &std::path::Path,
        profile_id: &str,
        duration_sec: u32,
        fps: u32,
        width: u32,
        height: u32,
    ) -> VideoResult<String> {
        let asset_id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO video_assets (
                    id, filename, duration, fps, width, height, created_at, path, profile_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    asset_id,
                    output_filename,
                    duration_sec as f64,
                    fps,
                    width,
                    height,
                    now,
                    output_path.to_string_lossy(),
                    profile_id
                ],
            )?;
            tx.execute(
                "UPDATE video_jobs
                 SET status = ?1, progress = 100.0, output_video_id = ?2, ended_at = ?3, updated_at = ?3
                 WHERE id = ?4",
                params![JobStatus::Completed.as_str(), asset_id, now, job_id],
            )?;
            Ok(())
        })?;
        Ok(asset_id)
    }

    pub(crate) fn mark_job_cancelled(&self, job_id: &str) -> VideoResult<()> {
        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE video_jobs
                 SET status = ?1, progress = 0, ended_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![JobStatus::Cancelled.as_str(), now, job_id],
            )?;
            Ok(())
        })
    }

    pub(crate) fn mark_job_error(&self, job_id: &str, error: &str) -> VideoResult<()> {
        let truncated: String = error.chars().take(2000).collect();
        let now = now_timestamp();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE video_jobs
                 SET status = ?1, error = ?2, ended_at = ?3, updated_at = ?3
                 WHERE id = ?4",
                params![JobStatus::Error.as_str(), truncated, now, job_id],
            )?;
            Ok(())
        })
    }

    pub(crate) fn cleanup_temp(&self, job_id: &str) {
        let temp_job_dir = self.config.temp_dir.join(job_id);
        if temp_job_dir.exists() {
            let _ = std::fs::remove_dir_all(&temp_job_dir);
        }
    }

    pub(crate) fn register_process(&self, job_id: &str, child: Arc<Mutex<Child>>) {
        self.active_processes
            .lock()
            .unwrap()
            .insert(job_id.to_string(), child);
    }

    pub(crate) fn unregister_process(&self, job_id: &str) {
        self.active_processes.lock().unwrap().remove(job_id);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }
}

fn validate_request(req: &VideoGenerateRequest) -> VideoResult<()> {
    if req.profile_id.is_empty() {
        return Err(VideoError::validation("profile_id must not be empty"));
    }
    if let Some(duration) = req.duration_sec {
        if !(1..=30).contains(&duration) {
            return Err(VideoError::validation(
                "duration_sec must be between 1 and 30",
            ));
        }
    }
    if let Some(fps) = req.fps {
        if !(4..=60).contains(&fps) {
            return Err(VideoError::validation("fps must be between 4 and 60"));
        }
    }
    if !(256..=1920).contains(&req.width) {
        return Err(VideoError::validation(
            "width must be between 256 and 1920",
        ));
    }
    if !(256..=1920).contains(&req.height) {
        return Err(VideoError::validation(
            "height must be between 256 and 1920",
        ));
    }
    Ok(())
}
