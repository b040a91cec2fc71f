use serde::Serialize;
use std::path::PathBuf;

/// Resolved encode parameters for one job.
#[derive(Debug, Clone, Serialize)]
pub struct EncodeSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_sec: u32,
    pub keyframe_count: u32,
}

pub struct EncodeCommand {
    pub ffmpeg_args: Vec<String>,
    pub output_path: PathBuf,
}

/// Rate at which the still keyframes are fed into the encoder, spread
/// evenly across the clip but never below 1 frame per second.
pub fn input_framerate(keyframe_count: u32, duration_sec: u32) -> f64 {
    (keyframe_count as f64 / duration_sec.max(1) as f64).max(1.0)
}

/// Filter chain: fit into the target frame with centered padding, then
/// motion-interpolate the stills up to the requested fps.
pub fn build_filter_chain(width: u32, height: u32, fps: u32) -> String {
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,\
         format=yuv420p,\
         minterpolate=fps={fps}:mi_mode=mci:mc_mode=aobmc:vsbmc=1"
    )
}

/// Assemble the full ffmpeg invocation for one encode.
pub fn build_encode_command(
    spec: &EncodeSpec,
    input_pattern: &str,
    output_path: PathBuf,
) -> EncodeCommand {
    let framerate = input_framerate(spec.keyframe_count, spec.duration_sec);

    let ffmpeg_args = vec![
        "-y".to_string(),
        "-framerate".to_string(),
        format!("{framerate:.4}"),
        "-i".to_string(),
        input_pattern.to_string(),
        "-vf".to_string(),
        build_filter_chain(spec.width, spec.height, spec.fps),
        "-t".to_string(),
        spec.duration_sec.to_string(),
        "-r".to_string(),
        spec.fps.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output_path.to_string_lossy().to_string(),
    ];

    EncodeCommand {
        ffmpeg_args,
        output_path,
    }
}
