use rollcall_core::{FaceMatcher, DEFAULT_MATCH_THRESHOLD, DEFAULT_MIN_CORROBORATION};
use rollcall_core::detector::SCRFD_DEFAULT_CONFIDENCE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Optional TOML overlay; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    min_corroboration: Option<usize>,
    detection_confidence: Option<f32>,
    bus: Option<BusKind>,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Root for the database, session logs, sheets and reports.
    pub data_dir: PathBuf,
    /// SQLite database with students, embeddings and attendance rows.
    pub db_path: PathBuf,
    /// Euclidean distance threshold for a positive match. Unset means the
    /// loaded model's calibrated threshold, or the 0.4 default without one.
    pub match_threshold: Option<f32>,
    /// Close enrollment embeddings required when a student has several.
    pub min_corroboration: usize,
    /// SCRFD score below which detections are dropped.
    pub detection_confidence: f32,
    pub bus: BusKind,
}

impl Config {
    /// Load from the TOML file named by `ROLLCALL_CONFIG` (if any), then let
    /// `ROLLCALL_*` environment variables override it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match lookup("ROLLCALL_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let data_dir = lookup("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| {
                lookup("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        let model_dir = lookup("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let db_path = lookup("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        let bus = match lookup("ROLLCALL_BUS").as_deref() {
            Some("system") => BusKind::System,
            Some("session") => BusKind::Session,
            _ => file.bus.unwrap_or(BusKind::Session),
        };

        Ok(Self {
            model_dir,
            db_path,
            match_threshold: parsed(&lookup, "ROLLCALL_MATCH_THRESHOLD").or(file.match_threshold),
            min_corroboration: parsed(&lookup, "ROLLCALL_MIN_CORROBORATION")
                .or(file.min_corroboration)
                .unwrap_or(DEFAULT_MIN_CORROBORATION),
            detection_confidence: parsed(&lookup, "ROLLCALL_DETECTION_CONFIDENCE")
                .or(file.detection_confidence)
                .unwrap_or(SCRFD_DEFAULT_CONFIDENCE),
            bus,
            data_dir,
        })
    }

    /// Matcher for the configured threshold, falling back to `model_threshold`
    /// (the analyzer's calibration) and then to the default.
    pub fn matcher(&self, model_threshold: Option<f32>) -> FaceMatcher {
        let threshold = self
            .match_threshold
            .or(model_threshold)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);
        FaceMatcher::new(threshold).with_min_corroboration(self.min_corroboration)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn sheets_dir(&self) -> PathBuf {
        self.data_dir.join("sheets")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("HOME", "/home/t")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/t/.local/share/rollcall"));
        assert_eq!(config.db_path, config.data_dir.join("faces.db"));
        assert_eq!(config.model_dir, config.data_dir.join("models"));
        assert_eq!(config.match_threshold, None);
        assert_eq!(config.matcher(None).threshold, 0.4);
        assert_eq!(config.matcher(Some(1.0)).threshold, 1.0);
        assert_eq!(config.min_corroboration, 2);
        assert_eq!(config.bus, BusKind::Session);
        assert!(config.arcface_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_env_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("ROLLCALL_DATA_DIR", "/srv/rollcall"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.35"),
            ("ROLLCALL_MIN_CORROBORATION", "many"),
            ("ROLLCALL_BUS", "system"),
        ]))
        .unwrap();
        assert_eq!(config.sessions_dir(), PathBuf::from("/srv/rollcall/sessions"));
        assert_eq!(config.match_threshold, Some(0.35));
        // An explicit setting wins over the model's calibration.
        assert_eq!(config.matcher(Some(1.0)).threshold, 0.35);
        assert_eq!(config.min_corroboration, 2);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_file_overlay_below_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "data_dir = \"/var/lib/rollcall\"\nmatch_threshold = 0.3\nbus = \"system\"\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let config = Config::from_lookup(lookup_from(&[
            ("ROLLCALL_CONFIG", &path_str),
            ("ROLLCALL_MATCH_THRESHOLD", "0.25"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/rollcall"));
        assert_eq!(config.match_threshold, Some(0.25));
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_file_with_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "threshold = 1\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let err = Config::from_lookup(lookup_from(&[("ROLLCALL_CONFIG", &path_str)])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
