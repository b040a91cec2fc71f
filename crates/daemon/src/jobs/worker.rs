use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

use engine::command::{build_encode_command, EncodeSpec};

use crate::error::{VideoError, VideoResult};
use crate::jobs::{JobScheduler, JobStatus, DEQUEUE_TIMEOUT};
use crate::media::ffmpeg;

const SUPERVISE_POLL: Duration = Duration::from_millis(250);

/// Drain the backlog until shutdown. The dequeue wait is bounded so the
/// stop flag is observed promptly.
pub(crate) async fn run_worker(scheduler: Arc<JobScheduler>, mut queue: UnboundedReceiver<String>) {
    info!("Video worker started");
    while !scheduler.is_stopping() {
        let job_id = match tokio::time::timeout(DEQUEUE_TIMEOUT, queue.recv()).await {
            Ok(Some(id)) => id,
            Ok(None) => break,
            Err(_) => continue,
        };
        process_job(&scheduler, &job_id).await;
    }
    info!("Video worker stopped");
}

/// Drive one job to its terminal state. Nothing escapes: cancellation is
/// normal termination, anything else lands in the job's error column.
async fn process_job(scheduler: &Arc<JobScheduler>, job_id: &str) {
    match execute_job(scheduler, job_id).await {
        Ok(()) => {}
        Err(VideoError::Cancelled) => {
            info!("Video job '{job_id}' cancelled");
            if let Err(e) = scheduler.mark_job_cancelled(job_id) {
                error!("Failed to record cancellation for job '{job_id}': {e}");
            }
        }
        Err(e) => {
            error!("Video job '{job_id}' failed: {e}");
            if let Err(e) = scheduler.mark_job_error(job_id, &e.to_string()) {
                error!("Failed to record error for job '{job_id}': {e}");
            }
        }
    }
    scheduler.cleanup_temp(job_id);
}

async fn execute_job(scheduler: &Arc<JobScheduler>, job_id: &str) -> VideoResult<()> {
    let job = scheduler.get_job(job_id)?;
    // Handles double-enqueue and the waiting→cancelled pre-empt.
    if job.status != JobStatus::Waiting {
        return Ok(());
    }
    if scheduler.is_cancel_requested(job_id)? {
        return Err(VideoError::Cancelled);
    }

    let profile = scheduler.profiles.get(&job.profile_id)?;
    scheduler
        .profiles
        .validate_mode(profile.mode, profile.consent_checked)?;

    let duration_sec = job
        .request
        .duration_sec
        .unwrap_or(scheduler.config.default_duration_sec);
    let fps = job.request.fps.unwrap_or(scheduler.config.default_fps);
    let width = job.request.width.unwrap_or(1280);
    let height = job.request.height.unwrap_or(720);

    ffmpeg::ensure_free_space(&scheduler.config.outputs_dir, width, height, fps, duration_sec)?;

    scheduler.transition_running(job_id)?;

    let temp_job_dir = scheduler.config.temp_dir.join(job_id);
    tokio::fs::create_dir_all(&temp_job_dir).await?;

    let (input_pattern, keyframe_count) = ffmpeg::prepare_keyframes(
        scheduler.images.as_ref(),
        &temp_job_dir,
        &profile.reference_images,
        duration_sec,
        profile.generation_lock.strict_lock,
    )
    .await?;

    scheduler.transition_encoding(job_id)?;

    let output_filename = format!("{job_id}.mp4");
    let output_path = scheduler.config.outputs_dir.join(&output_filename);
    let spec = EncodeSpec {
        width,
        height,
        fps,
        duration_sec,
        keyframe_count,
    };
    encode_video(scheduler, job_id, &spec, &input_pattern, output_path.clone()).await?;

    // Cancellation that lands between encoder exit and this point still wins.
    if scheduler.is_cancel_requested(job_id)? {
        return Err(VideoError::Cancelled);
    }

    let asset_id = scheduler.complete_job(
        job_id,
        &output_filename,
        &output_path,
        &profile.id,
        duration_sec,
        fps,
        width,
        height,
    )?;
    info!("Video job '{job_id}' completed with asset '{asset_id}'");
    Ok(())
}

async fn encode_video(
    scheduler: &Arc<JobScheduler>,
    job_id: &str,
    spec: &EncodeSpec,
    input_pattern: &str,
    output_path: std::path::PathBuf,
) -> VideoResult<()> {
    let ffmpeg_bin = ffmpeg::resolve_ffmpeg()?;
    let cmd = build_encode_command(spec, input_pattern, output_path);

    let child = Command::new(&ffmpeg_bin)
        .args(&cmd.ffmpeg_args)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| VideoError::service(format!("failed to launch ffmpeg: {e}")))?;
    let child = Arc::new(Mutex::new(child));

    scheduler.register_process(job_id, child.clone());
    let result = supervise(scheduler, job_id, &child).await;
    scheduler.unregister_process(job_id);
    result
}

/// Poll the encoder until it exits. Each tick checks the durable cancel
/// flag and writes the encoding heartbeat.
async fn supervise(
    scheduler: &Arc<JobScheduler>,
    job_id: &str,
    child: &Arc<Mutex<Child>>,
) -> VideoResult<()> {
    loop {
        let exit = child.lock().unwrap().try_wait()?;
        match exit {
            Some(status) => {
                if !status.success() {
                    // A termination we requested surfaces as a non-zero
                    // exit; the durable flag decides how to classify it.
                    if scheduler.is_cancel_requested(job_id)? {
                        return Err(VideoError::Cancelled);
                    }
                    let msg = match status.code() {
                        Some(code) => format!("ffmpeg failed with exit code {code}"),
                        None => "ffmpeg terminated by signal".to_string(),
                    };
                    return Err(VideoError::service(msg));
                }
                scheduler.update_job_progress(job_id, 95.0)?;
                return Ok(());
            }
            None => {
                if scheduler.is_cancel_requested(job_id)? {
                    let _ = child.lock().unwrap().start_kill();
                    return Err(VideoError::Cancelled);
                }
                scheduler.update_job_progress(job_id, 60.0)?;
                tokio::time::sleep(SUPERVISE_POLL).await;
            }
        }
    }
}
