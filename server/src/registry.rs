// server/src/registry.rs

use chrono::Utc;
use common::{
    upload::{input_filename, new_task_id, output_filename},
    TaskId, TaskInfo, TaskStatus,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tracing::{info, warn};

const INTERRUPTED_MSG: &str = "interrumpida por reinicio del servidor";

/// Archivo JSON con el estado de las tareas.
/// Cada versión lleva un número de generación; una escritura vieja
/// que llega tarde no pisa a una más nueva.
struct Snapshot {
    path: PathBuf,
    written: Mutex<u64>,
}

impl Snapshot {
    fn write(&self, generation: u64, bytes: &[u8]) {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if generation <= *written {
            return;
        }

        let tmp = self.path.with_extension("json.tmp");
        let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &self.path));
        match result {
            Ok(()) => *written = generation,
            Err(e) => warn!("no se pudo guardar el registro en {}: {}", self.path.display(), e),
        }
    }
}

/// Estado de todas las tareas, indexado por id.
/// Cada cambio se vuelca a un JSON para sobrevivir reinicios.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<TaskId, TaskInfo>>>,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    snapshot: Option<Arc<Snapshot>>,
    generation: Arc<AtomicU64>,
}

impl TaskRegistry {
    pub fn new(upload_dir: PathBuf, output_dir: PathBuf, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            upload_dir,
            output_dir,
            snapshot: snapshot_path.map(|path| {
                Arc::new(Snapshot {
                    path,
                    written: Mutex::new(0),
                })
            }),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Carga el snapshot si existe. Lo que quedó en cola o corriendo
    /// no se va a terminar nunca, así que pasa a Failed.
    pub fn load(upload_dir: PathBuf, output_dir: PathBuf, snapshot_path: PathBuf) -> anyhow::Result<Self> {
        let registry = Self::new(upload_dir, output_dir, Some(snapshot_path.clone()));

        if !snapshot_path.exists() {
            return Ok(registry);
        }

        let raw = fs::read(&snapshot_path)?;
        let loaded: Vec<TaskInfo> = serde_json::from_slice(&raw)?;

        let mut tasks = registry.lock();
        for mut task in loaded {
            if !task.status.is_finished() {
                task.status = TaskStatus::Failed;
                task.error = Some(INTERRUPTED_MSG.to_string());
                task.finished_at = Some(Utc::now());
            }
            tasks.insert(task.id.clone(), task);
        }
        info!("{} tareas cargadas desde {}", tasks.len(), snapshot_path.display());
        registry.persist(tasks);

        Ok(registry)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskInfo>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Reserva un id nuevo y registra la tarea en Queued
    pub fn register(&self, filename: &str, output_ext: &str) -> TaskInfo {
        self.register_with(filename, output_ext, new_task_id)
    }

    /// Igual que `register` pero con generador de ids propio.
    /// Si el id ya existe (en memoria o en disco) se pide otro.
    pub fn register_with(
        &self,
        filename: &str,
        output_ext: &str,
        mut next_id: impl FnMut() -> TaskId,
    ) -> TaskInfo {
        let mut tasks = self.lock();

        let task = loop {
            let id = next_id();
            if tasks.contains_key(&id) {
                warn!("colisión de id de tarea {}, generando otro", id);
                continue;
            }

            let input_path = self.upload_dir.join(input_filename(&id, filename));
            let out_name = output_filename(&id, filename, output_ext);
            if input_path.exists() || self.output_dir.join(&out_name).exists() {
                warn!("ya hay archivos para el id {}, generando otro", id);
                continue;
            }

            break TaskInfo::new(
                id,
                filename.to_string(),
                input_path.to_string_lossy().to_string(),
                out_name,
            );
        };

        tasks.insert(task.id.clone(), task.clone());
        self.persist(tasks);
        task
    }

    pub fn get(&self, id: &str) -> Option<TaskInfo> {
        self.lock().get(id).cloned()
    }

    /// Todas las tareas, la más reciente primero
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut out: Vec<TaskInfo> = self.lock().values().cloned().collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        out
    }

    pub fn remove(&self, id: &str) -> Option<TaskInfo> {
        let mut tasks = self.lock();
        let removed = tasks.remove(id);
        if removed.is_some() {
            self.persist(tasks);
        }
        removed
    }

    pub fn mark_running(&self, id: &str) {
        self.update(id, |task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        });
    }

    pub fn mark_completed(&self, id: &str) {
        self.update(id, |task| {
            task.status = TaskStatus::Completed;
            task.error = None;
            task.finished_at = Some(Utc::now());
        });
    }

    pub fn mark_failed(&self, id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(id, |task| {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            task.finished_at = Some(Utc::now());
        });
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut TaskInfo)) {
        let mut tasks = self.lock();
        let Some(task) = tasks.get_mut(id) else {
            warn!("actualización para tarea desconocida {}", id);
            return;
        };
        f(task);
        self.persist(tasks);
    }

    /// Serializa con el lock tomado y escribe el archivo ya sin él.
    /// Dentro de tokio la escritura va al pool de hilos bloqueantes.
    /// Un fallo acá no corta el servicio.
    fn persist(&self, tasks: MutexGuard<'_, HashMap<TaskId, TaskInfo>>) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = {
            let mut all: Vec<&TaskInfo> = tasks.values().collect();
            all.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
            serde_json::to_vec_pretty(&all)
        };
        drop(tasks);

        let bytes = match bytes {
            Ok(b) => b,
            Err(e) => {
                warn!("no se pudo serializar el registro: {}", e);
                return;
            }
        };

        let snapshot = snapshot.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _ = handle.spawn_blocking(move || snapshot.write(generation, &bytes));
            }
            Err(_) => snapshot.write(generation, &bytes),
        }
    }
}
