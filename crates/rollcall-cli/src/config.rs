use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which detector feeds the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Treat the whole image as the face (pre-cropped portraits).
    FullFrame,
    /// SCRFD ONNX model from the model directory.
    Scrfd,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::FullFrame => "full-frame",
            DetectorKind::Scrfd => "scrfd",
        }
    }
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "full-frame" => Ok(DetectorKind::FullFrame),
            "scrfd" => Ok(DetectorKind::Scrfd),
            other => anyhow::bail!("unknown detector {other:?} (expected full-frame or scrfd)"),
        }
    }
}

/// CLI configuration: defaults, then the TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Signature store file.
    pub store_path: PathBuf,
    /// Minimum similarity for a positive recognition.
    pub similarity_threshold: f32,
    pub detector: DetectorKind,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Smallest face side, in pixels, the SCRFD detector reports.
    pub min_face_size: u32,
}

/// Optional keys accepted in `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    store_path: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    detector: Option<DetectorKind>,
    model_dir: Option<PathBuf>,
    min_face_size: Option<u32>,
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::defaults(&env);

        let explicit = env("ROLLCALL_CONFIG").map(PathBuf::from);
        let file_path = explicit.clone().unwrap_or_else(|| config_dir(&env).join("config.toml"));
        if explicit.is_some() || file_path.exists() {
            config.apply_file(&file_path)?;
        }

        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    /// Reject values no recognition could work with.
    pub fn validate(&self) -> Result<()> {
        check_threshold(self.similarity_threshold)?;
        Ok(())
    }

    fn defaults(env: &impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home(env).join(".local/share"))
            .join("rollcall");

        Self {
            store_path: data_dir.join("signatures.bin"),
            similarity_threshold: rollcall_core::DEFAULT_THRESHOLD,
            detector: DetectorKind::FullFrame,
            model_dir: data_dir.join("models"),
            min_face_size: 30,
        }
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");

        if let Some(v) = file.store_path {
            self.store_path = v;
        }
        if let Some(v) = file.similarity_threshold {
            self.similarity_threshold = v;
        }
        if let Some(v) = file.detector {
            self.detector = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.min_face_size {
            self.min_face_size = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROLLCALL_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.similarity_threshold =
            env_parse(env, "ROLLCALL_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.detector = env_parse(env, "ROLLCALL_DETECTOR", self.detector);
        self.min_face_size = env_parse(env, "ROLLCALL_MIN_FACE_SIZE", self.min_face_size);
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

/// Accept only finite thresholds.
pub fn check_threshold(threshold: f32) -> Result<f32> {
    if !threshold.is_finite() {
        anyhow::bail!("similarity threshold must be a finite number, got {threshold}");
    }
    Ok(threshold)
}

fn home(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(env("HOME").unwrap_or_else(|| "/tmp".to_string()))
}

fn config_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home(env).join(".config"))
        .join("rollcall")
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
                default
            }
        },
        None => default,
    }
}
