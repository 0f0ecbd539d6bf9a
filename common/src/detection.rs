use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use glob::{glob, Pattern};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Líneas finales de stderr que guardamos cuando el detector falla
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("modelo no encontrado en {0}")]
    ModelNotFound(PathBuf),

    #[error("no se pudo lanzar el detector `{bin}`: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("el detector terminó con código {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("el video anotado no fue generado en {0}")]
    OutputMissing(PathBuf),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

/// Hiperparámetros fijos de la detección
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub conf: f32,
    pub iou: f32,
    /// 1 = se procesan todos los frames
    pub vid_stride: u32,
    pub line_width: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            conf: 0.40,
            iou: 0.55,
            vid_stride: 1,
            line_width: 2,
        }
    }
}

/// Detector externo ya cargado. Se comparte entre todas las tareas,
/// por eso no recibe `&mut self`.
pub trait Detector: Send + Sync {
    /// Anota `input` y deja el resultado dentro de `project/name/`.
    fn detect(&self, input: &Path, project: &Path, name: &str) -> Result<(), DetectionError>;

    /// Extensión del video que genera (sin punto)
    fn output_extension(&self) -> &str;
}

/// Detector basado en la CLI `yolo` de Ultralytics con un modelo `.pt` local.
#[derive(Debug, Clone)]
pub struct YoloCliDetector {
    bin: String,
    model_path: PathBuf,
    params: DetectionParams,
    output_ext: String,
}

impl YoloCliDetector {
    /// Verifica que el modelo exista. Se hace una sola vez al arrancar.
    pub fn load(
        bin: impl Into<String>,
        model_path: impl Into<PathBuf>,
        output_ext: impl Into<String>,
    ) -> Result<Self, DetectionError> {
        let model_path = model_path.into();
        if !model_path.is_file() {
            return Err(DetectionError::ModelNotFound(model_path));
        }

        Ok(Self {
            bin: bin.into(),
            model_path,
            params: DetectionParams::default(),
            output_ext: output_ext.into(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn args(&self, input: &Path, project: &Path, name: &str) -> Vec<String> {
        let p = &self.params;
        vec![
            "predict".to_string(),
            format!("model={}", self.model_path.display()),
            format!("source={}", input.display()),
            format!("conf={:.2}", p.conf),
            format!("iou={:.2}", p.iou),
            "save=True".to_string(),
            format!("project={}", project.display()),
            format!("name={}", name),
            "exist_ok=True".to_string(),
            format!("vid_stride={}", p.vid_stride),
            format!("line_width={}", p.line_width),
        ]
    }
}

impl Detector for YoloCliDetector {
    fn detect(&self, input: &Path, project: &Path, name: &str) -> Result<(), DetectionError> {
        let args = self.args(input, project, name);
        debug!("ejecutando {} {}", self.bin, args.join(" "));

        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .map_err(|source| DetectionError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectionError::Failed {
                code: output.status.code(),
                stderr: tail_lines(&stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(())
    }

    fn output_extension(&self) -> &str {
        &self.output_ext
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Busca el video que dejó el detector en `dir`:
/// primero `<expected_stem>.<ext>`, si no el primer `*.<ext>`.
pub fn find_produced_video(dir: &Path, expected_stem: &str, ext: &str) -> Option<PathBuf> {
    let exact = dir.join(format!("{}.{}", expected_stem, ext));
    if exact.is_file() {
        return Some(exact);
    }

    let pattern = format!("{}/*.{}", Pattern::escape(&dir.to_string_lossy()), ext);
    let mut found: Vec<PathBuf> = glob(&pattern)
        .ok()?
        .flatten()
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    found.into_iter().next()
}

/// Una detección completa para una tarea.
pub struct DetectionRun<'a> {
    pub task_id: &'a str,
    pub input_path: &'a Path,
    pub output_dir: &'a Path,
    pub output_filename: &'a str,
}

impl DetectionRun<'_> {
    /// Corre el detector, mueve el video a `output_dir/output_filename`
    /// y limpia. El archivo de entrada se borra siempre, salga bien o mal.
    pub fn execute(&self, detector: &dyn Detector) -> Result<PathBuf, DetectionError> {
        let predicted_dir = self.output_dir.join(self.task_id);
        let result = self.detect_and_collect(detector, &predicted_dir);

        if predicted_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&predicted_dir) {
                warn!("no se pudo borrar {}: {}", predicted_dir.display(), e);
            }
        }

        match fs::remove_file(self.input_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("no se pudo borrar la entrada {}: {}", self.input_path.display(), e),
        }

        result
    }

    fn detect_and_collect(
        &self,
        detector: &dyn Detector,
        predicted_dir: &Path,
    ) -> Result<PathBuf, DetectionError> {
        info!("procesando tarea {} ({})", self.task_id, self.input_path.display());
        detector.detect(self.input_path, self.output_dir, self.task_id)?;

        let expected_stem = self
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let produced = find_produced_video(predicted_dir, &expected_stem, detector.output_extension())
            .ok_or_else(|| DetectionError::OutputMissing(predicted_dir.to_path_buf()))?;

        let final_path = self.output_dir.join(self.output_filename);
        fs::rename(&produced, &final_path)?;
        info!("video listo: {}", final_path.display());

        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, sync::Mutex};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("detection_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    /// Escribe un video falso con el nombre que usaría yolo
    struct FakeDetector {
        ext: String,
        produce: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDetector {
        fn new(ext: &str, produce: bool) -> Self {
            Self {
                ext: ext.to_string(),
                produce,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Detector for FakeDetector {
        fn detect(&self, input: &Path, project: &Path, name: &str) -> Result<(), DetectionError> {
            self.calls.lock().unwrap().push(name.to_string());
            let dir = project.join(name);
            fs::create_dir_all(&dir)?;
            if self.produce {
                let stem = input.file_stem().unwrap().to_string_lossy();
                fs::write(dir.join(format!("{}.{}", stem, self.ext)), b"anotado")?;
            }
            Ok(())
        }

        fn output_extension(&self) -> &str {
            &self.ext
        }
    }

    #[test]
    fn params_por_defecto() {
        let p = DetectionParams::default();
        assert_eq!(p.conf, 0.40);
        assert_eq!(p.iou, 0.55);
        assert_eq!(p.vid_stride, 1);
        assert_eq!(p.line_width, 2);
    }

    #[test]
    fn load_falla_si_no_hay_modelo() {
        let tmp = temp_dir("no_model");
        let err = YoloCliDetector::load("yolo", tmp.join("best.pt"), "avi").unwrap_err();
        assert!(matches!(err, DetectionError::ModelNotFound(_)));
    }

    #[test]
    fn argumentos_de_yolo() {
        let tmp = temp_dir("args");
        let model = tmp.join("best.pt");
        fs::write(&model, b"pesos").unwrap();

        let det = YoloCliDetector::load("yolo", &model, "avi").unwrap();
        let args = det.args(Path::new("/u/ab_x.mp4"), Path::new("/o"), "ab");

        assert_eq!(args[0], "predict");
        assert!(args.contains(&format!("model={}", model.display())));
        assert!(args.contains(&"source=/u/ab_x.mp4".to_string()));
        assert!(args.contains(&"conf=0.40".to_string()));
        assert!(args.contains(&"iou=0.55".to_string()));
        assert!(args.contains(&"project=/o".to_string()));
        assert!(args.contains(&"name=ab".to_string()));
        assert!(args.contains(&"vid_stride=1".to_string()));
        assert!(args.contains(&"line_width=2".to_string()));
        assert_eq!(det.output_extension(), "avi");
    }

    #[test]
    fn detector_inexistente_da_error_de_spawn() {
        let tmp = temp_dir("spawn");
        let model = tmp.join("best.pt");
        fs::write(&model, b"pesos").unwrap();

        let det = YoloCliDetector::load("/no/existe/yolo-bin", &model, "avi").unwrap();
        let err = det.detect(&tmp.join("x.mp4"), &tmp, "t1").unwrap_err();
        assert!(matches!(err, DetectionError::Spawn { .. }));
    }

    #[test]
    fn find_produced_video_prefiere_nombre_exacto() {
        let tmp = temp_dir("find_exact");
        fs::write(tmp.join("aaa.avi"), b"x").unwrap();
        fs::write(tmp.join("id_clip.avi"), b"x").unwrap();

        let found = find_produced_video(&tmp, "id_clip", "avi").unwrap();
        assert_eq!(found, tmp.join("id_clip.avi"));
    }

    #[test]
    fn find_produced_video_cae_al_glob_por_extension() {
        let tmp = temp_dir("find_glob");
        fs::write(tmp.join("otro.avi"), b"x").unwrap();
        fs::write(tmp.join("labels.txt"), b"x").unwrap();

        assert_eq!(find_produced_video(&tmp, "id_clip", "avi"), Some(tmp.join("otro.avi")));
        assert_eq!(find_produced_video(&tmp, "id_clip", "mp4"), None);
    }

    #[test]
    fn ejecucion_exitosa_mueve_y_limpia() {
        let tmp = temp_dir("run_ok");
        let uploads = tmp.join("uploads");
        let outputs = tmp.join("outputs");
        fs::create_dir_all(&uploads).unwrap();
        fs::create_dir_all(&outputs).unwrap();

        let input = uploads.join("ab12cd34_sample.mp4");
        fs::write(&input, b"video").unwrap();

        let det = FakeDetector::new("mp4", true);
        let run = DetectionRun {
            task_id: "ab12cd34",
            input_path: &input,
            output_dir: &outputs,
            output_filename: "detected_ab12cd34_sample.mp4",
        };

        let out = run.execute(&det).unwrap();

        assert_eq!(out, outputs.join("detected_ab12cd34_sample.mp4"));
        assert_eq!(fs::read(&out).unwrap(), b"anotado");
        assert!(!input.exists(), "la entrada debe borrarse");
        assert!(!outputs.join("ab12cd34").exists(), "el subdirectorio temporal debe borrarse");
        assert_eq!(*det.calls.lock().unwrap(), vec!["ab12cd34".to_string()]);
    }

    #[test]
    fn sin_video_generado_falla_y_borra_la_entrada() {
        let tmp = temp_dir("run_missing");
        let outputs = tmp.join("outputs");
        fs::create_dir_all(&outputs).unwrap();

        let input = tmp.join("ffff0000_calle.mov");
        fs::write(&input, b"video").unwrap();

        let det = FakeDetector::new("avi", false);
        let run = DetectionRun {
            task_id: "ffff0000",
            input_path: &input,
            output_dir: &outputs,
            output_filename: "detected_ffff0000_calle.avi",
        };

        let err = run.execute(&det).unwrap_err();

        assert!(matches!(err, DetectionError::OutputMissing(_)));
        assert!(!input.exists());
        assert!(!outputs.join("ffff0000").exists());
        assert!(!outputs.join("detected_ffff0000_calle.avi").exists());
    }

    #[test]
    fn tail_lines_recorta() {
        let text = "a\nb\nc\nd";
        assert_eq!(tail_lines(text, 2), "c\nd");
        assert_eq!(tail_lines(text, 10), "a\nb\nc\nd");
    }
}
