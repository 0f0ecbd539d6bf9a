// server/src/worker.rs
//
// Pool de detección: una cola acotada y a lo sumo `concurrency`
// detecciones corriendo a la vez (un permiso del semáforo por tarea).

use common::{DetectionError, DetectionRun, Detector, TaskId};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot, Semaphore,
};
use tracing::{info, warn};

use crate::error::{detection_message, ServerError};
use crate::registry::TaskRegistry;

pub type JobResult = Result<PathBuf, DetectionError>;

#[derive(Debug)]
pub struct DetectionJob {
    pub task_id: TaskId,
    pub input_path: PathBuf,
    pub output_filename: String,
    /// Solo lo usa el modo sync, que espera el resultado
    pub done: Option<oneshot::Sender<JobResult>>,
}

/// Lado productor de la cola. Clonable, va dentro del AppState.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DetectionJob>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<DetectionJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Encola sin esperar; si la cola está llena se rechaza.
    pub fn submit(&self, job: DetectionJob) -> Result<(), ServerError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => {
                warn!("cola llena, rechazando tarea {}", job.task_id);
                ServerError::QueueFull
            }
            TrySendError::Closed(_) => ServerError::Internal("el pool de detección está detenido".into()),
        })
    }
}

/// Detector + cola. Existe solo si el modelo cargó bien.
#[derive(Clone)]
pub struct DetectionService {
    pub queue: JobQueue,
    output_ext: String,
}

impl DetectionService {
    pub fn output_ext(&self) -> &str {
        &self.output_ext
    }
}

/// Arranca el loop del pool en segundo plano
pub fn start(
    detector: Arc<dyn Detector>,
    registry: TaskRegistry,
    concurrency: usize,
    capacity: usize,
) -> DetectionService {
    let (queue, rx) = JobQueue::bounded(capacity);
    let output_ext = detector.output_extension().to_string();

    info!(
        "pool de detección: concurrency={} capacidad de cola={}",
        concurrency, capacity
    );

    tokio::spawn(run(rx, detector, registry, concurrency));

    DetectionService { queue, output_ext }
}

async fn run(
    mut rx: mpsc::Receiver<DetectionJob>,
    detector: Arc<dyn Detector>,
    registry: TaskRegistry,
    concurrency: usize,
) {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));

    loop {
        // primero un slot libre, después la siguiente tarea
        let permit = match sem.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };

        let Some(job) = rx.recv().await else {
            info!("cola de detección cerrada, terminando pool");
            break;
        };

        let detector = detector.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            process(job, detector, registry).await;
            drop(permit);
        });
    }
}

async fn process(job: DetectionJob, detector: Arc<dyn Detector>, registry: TaskRegistry) {
    let DetectionJob {
        task_id,
        input_path,
        output_filename,
        done,
    } = job;

    registry.mark_running(&task_id);
    info!("tarea {} en ejecución", task_id);

    let output_dir = registry.output_dir().to_path_buf();
    let id = task_id.clone();

    // la detección bloquea, va al pool de hilos de tokio
    let handle = tokio::task::spawn_blocking(move || {
        DetectionRun {
            task_id: &id,
            input_path: &input_path,
            output_dir: &output_dir,
            output_filename: &output_filename,
        }
        .execute(detector.as_ref())
    });

    let result: JobResult = match handle.await {
        Ok(res) => res,
        Err(e) => {
            warn!("panic o join error en tarea {}: {:?}", task_id, e);
            Err(DetectionError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("la tarea de detección abortó: {e}"),
            )))
        }
    };

    match &result {
        Ok(path) => {
            info!("tarea {} terminada: {}", task_id, path.display());
            registry.mark_completed(&task_id);
        }
        Err(e) => {
            warn!("error procesando tarea {}: {}", task_id, e);
            registry.mark_failed(&task_id, detection_message(e));
        }
    }

    if let Some(tx) = done {
        // el que esperaba pudo haberse ido (petición cancelada)
        let _ = tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{temp_dir, FakeDetector, GatedDetector};
    use common::TaskStatus;
    use std::{fs, time::Duration};

    fn job_for(registry: &TaskRegistry, name: &str) -> (DetectionJob, oneshot::Receiver<JobResult>) {
        let task = registry.register(name, "avi");
        fs::write(&task.input_path, b"video").unwrap();
        let (tx, rx) = oneshot::channel();
        let job = DetectionJob {
            task_id: task.id,
            input_path: PathBuf::from(task.input_path),
            output_filename: task.output_filename,
            done: Some(tx),
        };
        (job, rx)
    }

    #[test]
    fn submit_rechaza_con_cola_llena() {
        let (queue, _rx) = JobQueue::bounded(1);
        let mk = |id: &str| DetectionJob {
            task_id: id.to_string(),
            input_path: PathBuf::from("x"),
            output_filename: "y".to_string(),
            done: None,
        };

        assert!(queue.submit(mk("a")).is_ok());
        assert!(matches!(queue.submit(mk("b")), Err(ServerError::QueueFull)));
    }

    #[test]
    fn submit_con_pool_detenido_es_error_interno() {
        let (queue, rx) = JobQueue::bounded(1);
        drop(rx);

        let job = DetectionJob {
            task_id: "a".into(),
            input_path: PathBuf::from("x"),
            output_filename: "y".into(),
            done: None,
        };
        assert!(matches!(queue.submit(job), Err(ServerError::Internal(_))));
    }

    #[tokio::test]
    async fn pool_completa_tarea_y_actualiza_registro() {
        let base = temp_dir("worker_tests", "ok");
        let registry = TaskRegistry::new(base.join("uploads"), base.join("outputs"), None);
        let svc = start(Arc::new(FakeDetector { ext: "avi", produce: true }), registry.clone(), 2, 4);

        let (job, rx) = job_for(&registry, "calle.mp4");
        let id = job.task_id.clone();
        let input = job.input_path.clone();
        svc.queue.submit(job).unwrap();

        let out = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(out.is_file());
        assert!(!input.exists());

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.started_at.is_some());
        assert_eq!(svc.output_ext(), "avi");
    }

    #[tokio::test]
    async fn pool_marca_fallida_si_no_hay_salida() {
        let base = temp_dir("worker_tests", "fail");
        let registry = TaskRegistry::new(base.join("uploads"), base.join("outputs"), None);
        let svc = start(Arc::new(FakeDetector { ext: "avi", produce: false }), registry.clone(), 1, 4);

        let (job, rx) = job_for(&registry, "calle.mp4");
        let id = job.task_id.clone();
        let input = job.input_path.clone();
        svc.queue.submit(job).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert!(matches!(res, Err(DetectionError::OutputMissing(_))));
        assert!(!input.exists());

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert!(error.contains("no fue generado"));
        assert!(!error.contains(&base.to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn nunca_corren_mas_detecciones_que_workers() {
        let base = temp_dir("worker_tests", "concurrency");
        let registry = TaskRegistry::new(base.join("uploads"), base.join("outputs"), None);
        let detector = Arc::new(GatedDetector::new("avi"));
        let svc = start(detector.clone(), registry.clone(), 2, 8);

        let mut waiting = Vec::new();
        for i in 0..5 {
            let (job, rx) = job_for(&registry, &format!("calle{i}.mp4"));
            svc.queue.submit(job).unwrap();
            waiting.push(rx);
        }

        detector.wait_started(2).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(detector.started(), 2, "la tercera tarea tiene que esperar un permiso");

        detector.open();
        for rx in waiting {
            let res = tokio::time::timeout(Duration::from_secs(10), rx).await.unwrap().unwrap();
            assert!(res.is_ok());
        }

        assert_eq!(detector.started(), 5);
        assert_eq!(detector.peak(), 2);
        assert!(registry.list().iter().all(|t| t.status == TaskStatus::Completed));
    }
}
