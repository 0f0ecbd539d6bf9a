pub mod api;
pub mod detection;
pub mod task;
pub mod upload;

pub use api::{CheckResultResponse, ErrorResponse, UploadResponse};
pub use detection::{DetectionError, DetectionParams, DetectionRun, Detector, YoloCliDetector};
pub use task::{TaskId, TaskInfo, TaskStatus};
pub use upload::{UploadError, ALLOWED_EXTENSIONS};
