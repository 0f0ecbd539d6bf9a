use axum::{
    body::Body,
    extract::{
        multipart::{Field, Multipart},
        DefaultBodyLimit, Path, Query, Request, State,
    },
    http::{header, HeaderValue},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    upload::{mime_for, original_extension, validate_upload_filename},
    CheckResultResponse, TaskInfo, UploadError, UploadResponse,
};
use serde::Deserialize;
use std::path::{Component, Path as FsPath, PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::oneshot};
use tower::ServiceExt;
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::config::Mode;
use crate::error::ServerError;
use crate::pages;
use crate::state::AppState;
use crate::worker::{DetectionJob, JobResult};

/// Nombre del campo del formulario con el video
pub const VIDEO_FIELD: &str = "video";

pub fn build_router(state: AppState) -> Router {
    let upload = match state.config.mode {
        Mode::Async => post(upload_video_async),
        Mode::Sync => post(upload_video_sync),
    };
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/upload", upload)
        .route("/check_result/:task_id", get(check_result))
        .route("/outputs/:filename", get(get_output))
        .route("/api/v1/tasks", get(list_tasks))
        .route("/api/v1/tasks/:id", get(get_task))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    flash: Option<String>,
}

async fn index(State(state): State<AppState>, Query(q): Query<IndexQuery>) -> Html<String> {
    Html(pages::index_page(q.flash.as_deref(), state.config.mode))
}

// Lee el form, valida el nombre y guarda el video en uploads/.
// Nada se escribe en disco si el nombre o la extensión no sirven.
async fn receive_upload(state: &AppState, mut multipart: Multipart) -> Result<TaskInfo, ServerError> {
    let detection = state.detection()?;

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let filename = validate_upload_filename(&raw_name)?;

        // sync conserva el nombre subido; async anuncia la extensión del detector
        let output_ext = match state.config.mode {
            Mode::Sync => original_extension(&filename),
            Mode::Async => detection.output_ext(),
        };
        let task = state.registry.register(&filename, output_ext);
        let input_path = PathBuf::from(&task.input_path);

        match save_field(&mut field, &input_path).await {
            Ok(bytes) => {
                info!(
                    "video recibido: {} -> {} ({} bytes, tarea {})",
                    raw_name,
                    input_path.display(),
                    bytes,
                    task.id
                );
                return Ok(task);
            }
            Err(e) => {
                warn!("falló la subida de la tarea {}: {}", task.id, e);
                let _ = fs::remove_file(&input_path).await;
                state.registry.remove(&task.id);
                return Err(e);
            }
        }
    }

    Err(UploadError::NoFile.into())
}

async fn save_field(field: &mut Field<'_>, path: &FsPath) -> Result<u64, ServerError> {
    // create_new: nunca pisamos un archivo existente
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

// Manda la tarea al pool; si no entra, se deshace la subida
fn enqueue(
    state: &AppState,
    task: &TaskInfo,
    done: Option<oneshot::Sender<JobResult>>,
) -> Result<(), ServerError> {
    let detection = state.detection()?;

    let job = DetectionJob {
        task_id: task.id.clone(),
        input_path: PathBuf::from(&task.input_path),
        output_filename: task.output_filename.clone(),
        done,
    };

    if let Err(e) = detection.queue.submit(job) {
        if let Err(rm) = std::fs::remove_file(&task.input_path) {
            warn!("no se pudo borrar {}: {}", task.input_path, rm);
        }
        state.registry.remove(&task.id);
        return Err(e);
    }

    debug!("tarea {} encolada", task.id);
    Ok(())
}

async fn upload_video_async(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let task = receive_upload(&state, multipart).await?;
    enqueue(&state, &task, None)?;

    Ok(Json(UploadResponse {
        success: true,
        task_id: task.id,
        output_filename: task.output_filename,
        message: "Procesamiento iniciado".to_string(),
    }))
}

// Modo sync: la petición espera a que termine la detección
async fn upload_video_sync(State(state): State<AppState>, multipart: Multipart) -> Response {
    match detect_and_wait(&state, multipart).await {
        Ok(task) => Html(pages::result_page(&task, "Detección terminada con éxito")).into_response(),
        Err(e) => {
            warn!("subida rechazada: {}", e);
            flash_redirect(&e.client_message()).into_response()
        }
    }
}

async fn detect_and_wait(state: &AppState, multipart: Multipart) -> Result<TaskInfo, ServerError> {
    let task = receive_upload(state, multipart).await?;

    let (tx, rx) = oneshot::channel();
    enqueue(state, &task, Some(tx))?;

    match rx.await {
        Ok(Ok(_)) => Ok(state.registry.get(&task.id).unwrap_or(task)),
        Ok(Err(e)) => Err(ServerError::Detection(e)),
        Err(_) => Err(ServerError::Internal(format!(
            "la tarea {} terminó sin resultado",
            task.id
        ))),
    }
}

fn flash_redirect(message: &str) -> Redirect {
    Redirect::to(&format!("/?flash={}", urlencoding::encode(message)))
}

async fn check_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<CheckResultResponse>, ServerError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ServerError::NotFound(format!("Tarea desconocida: {task_id}")))?;

    Ok(Json(CheckResultResponse::from(&task)))
}

// Solo nombres planos dentro de outputs/: un único componente normal
fn is_plain_filename(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return false;
    }

    let mut components = FsPath::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn get_output(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    let not_found = || ServerError::NotFound(format!("Archivo no encontrado: {filename}"));

    if !is_plain_filename(&filename) {
        return Err(not_found());
    }

    let path = state.config.output_dir.join(&filename);
    if !path.is_file() {
        return Err(not_found());
    }

    // ServeFile se encarga de Range (el <video> del navegador lo usa)
    let res = match ServeFile::new(&path).oneshot(req).await {
        Ok(res) => res,
        Err(never) => match never {},
    };

    let mut res = res.map(Body::new);
    if res.status().is_success() {
        res.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime_for(&filename)));
    }
    Ok(res)
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskInfo>> {
    Json(state.registry.list())
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskInfo>, ServerError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Tarea desconocida: {id}")))
}
