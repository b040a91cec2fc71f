use std::path::PathBuf;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Image store root (reference images live here)
    pub images_dir: PathBuf,
    /// Completed MP4s are written here
    pub outputs_dir: PathBuf,
    /// Per-job keyframe scratch directories live here
    pub temp_dir: PathBuf,
    /// Duration applied when a generate request leaves it unset
    pub default_duration_sec: u32,
    /// Frame rate applied when a generate request leaves it unset
    pub default_fps: u32,
    /// Whether real-identity profiles must carry a consent confirmation
    pub require_consent_for_real_identity: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            db_path: PathBuf::from(".cache/video.db"),
            images_dir: PathBuf::from(".cache/images"),
            outputs_dir: PathBuf::from(".cache/video_outputs"),
            temp_dir: PathBuf::from(".cache/video_temp"),
            default_duration_sec: 4,
            default_fps: 24,
            require_consent_for_real_identity: true,
        }
    }
}

impl AppConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            db_path: std::env::var("VIDEO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            images_dir: std::env::var("IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.images_dir),
            outputs_dir: std::env::var("VIDEO_OUTPUTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.outputs_dir),
            temp_dir: std::env::var("VIDEO_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            default_duration_sec: std::env::var("VIDEO_DEFAULT_DURATION_SEC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_duration_sec),
            default_fps: std::env::var("VIDEO_DEFAULT_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_fps),
            require_consent_for_real_identity: std::env::var("VIDEO_REQUIRE_CONSENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.require_consent_for_real_identity),
        }
    }
}
