use std::path::{Path, PathBuf};

use crate::error::{VideoError, VideoResult};
use crate::images::ImageStore;
use engine::keyframes::{keyframe_filename, plan_keyframes, KEYFRAME_PATTERN};

const MIN_ESTIMATE_BYTES: u64 = 150 * 1024 * 1024;

/// Locate the ffmpeg binary: PATH first, then the WinGet link directory,
/// then the WinGet package subtree.
pub fn resolve_ffmpeg() -> VideoResult<PathBuf> {
    if let Ok(path) = which::which("ffmpeg") {
        return Ok(path);
    }
    if let Some(path) = winget_fallback() {
        return Ok(path);
    }
    Err(VideoError::service(
        "ffmpeg is required but was not found in PATH or WinGet links. Install ffmpeg and retry.",
    ))
}

fn winget_fallback() -> Option<PathBuf> {
    let local_app_data = std::env::var_os("LOCALAPPDATA")?;
    let winget_root = PathBuf::from(local_app_data)
        .join("Microsoft")
        .join("WinGet");

    let link = winget_root.join("Links").join("ffmpeg.exe");
    if link.exists() {
        return Some(link);
    }

    let packages = std::fs::read_dir(winget_root.join("Packages")).ok()?;
    for package in packages.flatten() {
        if !package
            .file_name()
            .to_string_lossy()
            .starts_with("Gyan.FFmpeg")
        {
            continue;
        }
        let Ok(subdirs) = std::fs::read_dir(package.path()) else {
            continue;
        };
        for subdir in subdirs.flatten() {
            if !subdir.file_name().to_string_lossy().starts_with("ffmpeg-") {
                continue;
            }
            let candidate = subdir.path().join("bin").join("ffmpeg.exe");
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Rough output-size estimate used by the pre-flight check.
pub fn estimate_required_bytes(width: u32, height: u32, fps: u32, duration_sec: u32) -> u64 {
    let estimate =
        width as u64 * height as u64 * fps as u64 * u64::from(duration_sec.max(1)) / 2;
    estimate.max(MIN_ESTIMATE_BYTES)
}

pub fn ensure_free_space(
    outputs_dir: &Path,
    width: u32,
    height: u32,
    fps: u32,
    duration_sec: u32,
) -> VideoResult<()> {
    let free_bytes = fs2::available_space(outputs_dir)?;
    let estimated_bytes = estimate_required_bytes(width, height, fps, duration_sec);

    if free_bytes < estimated_bytes {
        let free_mb = free_bytes / (1024 * 1024);
        let need_mb = estimated_bytes / (1024 * 1024);
        return Err(VideoError::service(format!(
            "Insufficient disk space for video encoding. Available: {free_mb}MB, required: {need_mb}MB."
        )));
    }
    Ok(())
}

/// Copy the profile's reference images into the job's temp directory as
/// numbered keyframes. Returns the printf-style input pattern and the
/// keyframe count.
pub async fn prepare_keyframes(
    images: &dyn ImageStore,
    temp_job_dir: &Path,
    reference_images: &[String],
    duration_sec: u32,
    strict_lock: bool,
) -> VideoResult<(String, u32)> {
    if reference_images.is_empty() {
        return Err(VideoError::validation("No reference images available"));
    }

    let mut source_paths = Vec::with_capacity(reference_images.len());
    for name in reference_images {
        let path = images
            .get_path(name)
            .map_err(|_| VideoError::validation("One or more reference images are invalid"))?;
        source_paths.push(path);
    }

    let plan = plan_keyframes(source_paths.len(), duration_sec, strict_lock);
    for (index, &source_index) in plan.source_indices.iter().enumerate() {
        let src_path = &source_paths[source_index];
        if !src_path.exists() {
            let name = src_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(VideoError::validation(format!(
                "Reference image '{name}' was not found"
            )));
        }
        tokio::fs::copy(src_path, temp_job_dir.join(keyframe_filename(index))).await?;
    }

    let pattern = temp_job_dir
        .join(KEYFRAME_PATTERN)
        .to_string_lossy()
        .into_owned();
    Ok((pattern, plan.count))
}
