// server/src/config.rs
//
// Configuración leída de variables de entorno al arrancar.
// Todo tiene un default para que funcione sin variables definidas.

use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 250;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_LOG_FILTER: &str = "server=debug,common=debug,tower_http=info";

/// Cómo responde POST /upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Devuelve el id de tarea en JSON y procesa en segundo plano
    Async,
    /// Bloquea la petición hasta terminar y devuelve una página HTML
    Sync,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "async" => Ok(Mode::Async),
            "sync" => Ok(Mode::Sync),
            other => Err(format!("modo desconocido: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model_path: PathBuf,
    /// Ejecutable de la CLI de Ultralytics
    pub yolo_bin: String,
    /// Extensión del video que genera el detector
    pub output_ext: String,
    /// Snapshot JSON del registro de tareas
    pub tasks_file: PathBuf,
    pub mode: Mode,
    pub max_upload_bytes: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    pub log_filter: String,
}

impl Config {
    /// Defaults con uploads/, outputs/ y model/best.pt bajo `base`
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            bind_address: DEFAULT_BIND.to_string(),
            upload_dir: base.join("uploads"),
            output_dir: base.join("outputs"),
            model_path: base.join("model").join("best.pt"),
            yolo_bin: "yolo".to_string(),
            output_ext: "avi".to_string(),
            tasks_file: base.join("tasks.json"),
            mode: Mode::Async,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let base = env::var("POTHOLE_BASE_DIR")
            .map(PathBuf::from)
            .or_else(|_| env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."));

        let defaults = Self::with_base_dir(&base);

        Self {
            bind_address: env_or("POTHOLE_BIND", &defaults.bind_address),
            upload_dir: path_env("POTHOLE_UPLOAD_DIR", defaults.upload_dir),
            output_dir: path_env("POTHOLE_OUTPUT_DIR", defaults.output_dir),
            model_path: path_env("POTHOLE_MODEL_PATH", defaults.model_path),
            yolo_bin: env_or("POTHOLE_YOLO_BIN", &defaults.yolo_bin),
            output_ext: env_or("POTHOLE_OUTPUT_EXT", &defaults.output_ext)
                .trim_start_matches('.')
                .to_string(),
            tasks_file: path_env("POTHOLE_TASKS_FILE", defaults.tasks_file),
            mode: parse_env("POTHOLE_MODE", defaults.mode),
            max_upload_bytes: parse_env("POTHOLE_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB) * 1024 * 1024,
            workers: parse_env("POTHOLE_WORKERS", defaults.workers).max(1),
            queue_capacity: parse_env("POTHOLE_QUEUE_CAPACITY", defaults.queue_capacity).max(1),
            log_filter: env_or("POTHOLE_LOG", &defaults.log_filter),
        }
    }

    /// Crea uploads/, outputs/ y el directorio del modelo si no existen
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        if let Some(model_dir) = self.model_path.parent() {
            std::fs::create_dir_all(model_dir)?;
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn path_env(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
