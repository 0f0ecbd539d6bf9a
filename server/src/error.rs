// server/src/error.rs
//
// Todos los handlers devuelven Result<T, ServerError>; se convierte en
// JSON {success: false, error} con el status que corresponda.
// Los errores internos se loguean completos y al cliente le llega
// un mensaje genérico.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{DetectionError, ErrorResponse, UploadError};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("petición inválida: {0}")]
    BadRequest(String),

    #[error("no encontrado: {0}")]
    NotFound(String),

    #[error("archivo demasiado grande: {0}")]
    PayloadTooLarge(String),

    #[error("modelo no cargado")]
    ModelUnavailable,

    #[error("cola de detección llena")]
    QueueFull,

    #[error("detección fallida: {0}")]
    Detection(#[from] DetectionError),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("error interno: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::ModelUnavailable
            | ServerError::Detection(_)
            | ServerError::Io(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Mensaje que ve el usuario (JSON o flash)
    pub fn client_message(&self) -> String {
        match self {
            ServerError::BadRequest(m) | ServerError::NotFound(m) | ServerError::PayloadTooLarge(m) => {
                m.clone()
            }
            ServerError::ModelUnavailable => {
                "Modelo no cargado. Verifique la ruta del archivo best.pt".to_string()
            }
            ServerError::QueueFull => {
                "Demasiados videos en proceso, intente de nuevo más tarde".to_string()
            }
            ServerError::Detection(e) => detection_message(e),
            ServerError::Io(_) | ServerError::Internal(_) => "Error interno del servidor".to_string(),
        }
    }
}

/// Lo que se guarda en la tarea y ve el cliente. Sin rutas ni stderr;
/// el detalle completo va al log.
pub fn detection_message(e: &DetectionError) -> String {
    match e {
        DetectionError::OutputMissing(_) => {
            "Error durante el procesamiento del video: el video anotado no fue generado".to_string()
        }
        DetectionError::Failed { code: Some(code), .. } => {
            format!("Error durante el procesamiento del video: el detector terminó con código {code}")
        }
        _ => "Error durante el procesamiento del video".to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "error procesando la petición");
        }

        let body = ErrorResponse {
            success: false,
            error: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<UploadError> for ServerError {
    fn from(e: UploadError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<MultipartError> for ServerError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServerError::PayloadTooLarge(e.body_text())
        } else {
            ServerError::BadRequest(format!("error leyendo el formulario: {}", e.body_text()))
        }
    }
}
