use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// true cuando la tarea ya no va a cambiar de estado
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,

    /// Nombre del archivo subido, ya saneado
    pub original_filename: String,

    /// Ruta del video guardado en uploads/ (se borra al terminar)
    pub input_path: String,

    /// Nombre final dentro de outputs/
    pub output_filename: String,

    pub status: TaskStatus,
    pub error: Option<String>,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn new(id: TaskId, original_filename: String, input_path: String, output_filename: String) -> Self {
        Self {
            id,
            original_filename,
            input_path,
            output_filename,
            status: TaskStatus::Queued,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn output_url(&self) -> String {
        format!("/outputs/{}", self.output_filename)
    }
}
