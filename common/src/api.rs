use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskInfo, TaskStatus};

/* --------- Respuestas HTTP compartidas entre server y client --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub output_filename: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResultResponse {
    pub success: bool,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskInfo> for CheckResultResponse {
    fn from(task: &TaskInfo) -> Self {
        let completed = task.status == TaskStatus::Completed;
        Self {
            success: completed,
            status: task.status,
            output_url: completed.then(|| task.output_url()),
            error: task.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}
