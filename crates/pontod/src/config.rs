use crate::engine::EngineSettings;
use ponto_core::DetectParams;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// OpenCV Haar cascade XML used to locate faces.
    pub cascade_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Hamming distance (of 64 bits) for a positive match.
    pub match_threshold: u32,
    /// Identification window in seconds.
    pub identify_window_secs: u64,
    /// Enrollment capture window in seconds.
    pub enroll_window_secs: u64,
    /// Delay between loop iterations.
    pub frame_pacing_ms: u64,
    /// Minimum face side in pixels during identification.
    pub identify_min_face: u32,
    /// Minimum face side in pixels during enrollment capture.
    pub enroll_min_face: u32,
    /// Cascade pyramid step.
    pub scale_factor: f32,
    /// Cascade grouping threshold.
    pub min_neighbors: u32,
    /// JPEG quality for UI frames and stored portraits.
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from `PONTO_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = default_data_dir();

        let cascade_path = std::env::var("PONTO_CASCADE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("haarcascade_frontalface_default.xml"));

        let db_path = std::env::var("PONTO_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("ponto.db"));

        Self {
            camera_device: std::env::var("PONTO_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            cascade_path,
            db_path,
            match_threshold: env_parse("PONTO_MATCH_THRESHOLD", 15),
            identify_window_secs: env_parse("PONTO_IDENTIFY_WINDOW_SECS", 5),
            enroll_window_secs: env_parse("PONTO_ENROLL_WINDOW_SECS", 10),
            frame_pacing_ms: env_parse("PONTO_FRAME_PACING_MS", 30),
            identify_min_face: env_parse("PONTO_IDENTIFY_MIN_FACE", ponto_core::detector::IDENTIFICATION_MIN_FACE),
            enroll_min_face: env_parse("PONTO_ENROLL_MIN_FACE", ponto_core::detector::ENROLLMENT_MIN_FACE),
            scale_factor: env_parse("PONTO_SCALE_FACTOR", ponto_core::detector::DEFAULT_SCALE_FACTOR),
            min_neighbors: env_parse("PONTO_MIN_NEIGHBORS", ponto_core::detector::DEFAULT_MIN_NEIGHBORS),
            jpeg_quality: env_parse("PONTO_JPEG_QUALITY", 80),
        }
    }

    pub fn cascade_path_str(&self) -> String {
        self.cascade_path.to_string_lossy().into_owned()
    }

    /// Project the tunables into the engine's settings.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            match_threshold: self.match_threshold.min(ponto_core::types::FINGERPRINT_BITS),
            identify_window: Duration::from_secs(self.identify_window_secs),
            enroll_window: Duration::from_secs(self.enroll_window_secs),
            frame_pacing: Duration::from_millis(self.frame_pacing_ms),
            identify_params: DetectParams {
                scale_factor: self.scale_factor,
                min_neighbors: self.min_neighbors,
                min_size: (self.identify_min_face, self.identify_min_face),
            },
            enroll_params: DetectParams {
                scale_factor: self.scale_factor,
                min_neighbors: self.min_neighbors,
                min_size: (self.enroll_min_face, self.enroll_min_face),
            },
            jpeg_quality: self.jpeg_quality,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("ponto")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            camera_device: "/dev/video0".into(),
            cascade_path: PathBuf::from("/tmp/cascade.xml"),
            db_path: PathBuf::from("/tmp/ponto.db"),
            match_threshold: 15,
            identify_window_secs: 5,
            enroll_window_secs: 10,
            frame_pacing_ms: 30,
            identify_min_face: 100,
            enroll_min_face: 30,
            scale_factor: 1.1,
            min_neighbors: 5,
            jpeg_quality: 80,
        }
    }

    #[test]
    fn test_engine_settings_projection() {
        let s = config().engine_settings();
        assert_eq!(s.match_threshold, 15);
        assert_eq!(s.identify_window, Duration::from_secs(5));
        assert_eq!(s.enroll_window, Duration::from_secs(10));
        assert_eq!(s.frame_pacing, Duration::from_millis(30));
        assert_eq!(s.identify_params, DetectParams::identification());
        assert_eq!(s.enroll_params, DetectParams::enrollment());
    }

    #[test]
    fn test_threshold_capped_at_fingerprint_width() {
        let mut c = config();
        c.match_threshold = 500;
        assert_eq!(c.engine_settings().match_threshold, 64);
    }
}
