use thiserror::Error;
use uuid::Uuid;

use crate::task::TaskId;

/// Extensiones de video aceptadas (comparación sin mayúsculas)
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv"];

/// Largo del id corto de tarea (hex de un uuid v4)
pub const TASK_ID_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("No se envió ningún archivo")]
    NoFile,

    #[error("Ningún archivo seleccionado")]
    EmptyFilename,

    #[error("Formato no soportado. Formatos aceptados: {}", ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedFormat,
}

/// Extensión en minúsculas (lo que va después del último '.')
pub fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn allowed_file(filename: &str) -> bool {
    match extension(filename) {
        Some(ext) => ALLOWED_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Deja solo [A-Za-z0-9._-], convierte separadores y espacios en '_',
/// junta puntos repetidos y quita '.' y '_' de los extremos.
/// Nunca devuelve una ruta.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let mut collapsed = String::with_capacity(kept.len());
    for c in kept.chars() {
        if c == '.' && collapsed.ends_with('.') {
            continue;
        }
        collapsed.push(c);
    }

    collapsed.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Valida el nombre recibido en el form y devuelve la versión saneada.
/// Se llama antes de escribir un solo byte en uploads/.
pub fn validate_upload_filename(raw: &str) -> Result<String, UploadError> {
    if raw.trim().is_empty() {
        return Err(UploadError::EmptyFilename);
    }

    let filename = secure_filename(raw);
    if filename.is_empty() {
        return Err(UploadError::EmptyFilename);
    }

    if !allowed_file(&filename) {
        return Err(UploadError::UnsupportedFormat);
    }

    Ok(filename)
}

pub fn new_task_id() -> TaskId {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(TASK_ID_LEN);
    id
}

/// Nombre sin extensión
pub fn file_stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
}

/// Extensión tal cual vino (sin pasar a minúsculas); "" si no tiene
pub fn original_extension(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// uploads/<id>_<filename>
pub fn input_filename(task_id: &str, filename: &str) -> String {
    format!("{}_{}", task_id, filename)
}

/// outputs/detected_<id>_<stem>.<ext>, con la extensión que produce el detector
pub fn output_filename(task_id: &str, filename: &str, output_ext: &str) -> String {
    format!("detected_{}_{}.{}", task_id, file_stem(filename), output_ext)
}

/// Tipo MIME según la extensión; si no la conocemos, binario genérico
pub fn mime_for(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("avi") => "video/x-msvideo",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("wmv") => "video/x-ms-wmv",
        _ => "application/octet-stream",
    }
}
