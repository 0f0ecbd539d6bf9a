// Helpers compartidos por los tests del server

use common::{DetectionError, Detector};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

pub fn temp_dir(group: &str, sub: &str) -> PathBuf {
    let base = env::temp_dir().join(group).join(sub);
    let _ = fs::remove_dir_all(&base);
    fs::create_dir_all(base.join("uploads")).unwrap();
    fs::create_dir_all(base.join("outputs")).unwrap();
    base
}

/// Deja un video falso donde lo dejaría yolo: `<project>/<name>/<stem>.<ext>`
pub struct FakeDetector {
    pub ext: &'static str,
    pub produce: bool,
}

impl Detector for FakeDetector {
    fn detect(&self, input: &Path, project: &Path, name: &str) -> Result<(), DetectionError> {
        let dir = project.join(name);
        fs::create_dir_all(&dir)?;
        if self.produce {
            let stem = input.file_stem().unwrap().to_string_lossy();
            fs::write(dir.join(format!("{}.{}", stem, self.ext)), b"anotado")?;
        }
        Ok(())
    }

    fn output_extension(&self) -> &str {
        self.ext
    }
}

/// Como FakeDetector, pero cada detección queda bloqueada hasta `open()`
/// (o 5 s como tope). Cuenta cuántas corren a la vez.
pub struct GatedDetector {
    pub ext: &'static str,
    open: AtomicBool,
    started: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedDetector {
    pub fn new(ext: &'static str) -> Self {
        Self {
            ext,
            open: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Espera (sin bloquear el runtime) a que arranquen `n` detecciones
    pub async fn wait_started(&self, n: usize) {
        for _ in 0..200 {
            if self.started() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("solo arrancaron {} de {} detecciones", self.started(), n);
    }
}

impl Detector for GatedDetector {
    fn detect(&self, input: &Path, project: &Path, name: &str) -> Result<(), DetectionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.open.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let dir = project.join(name);
        fs::create_dir_all(&dir)?;
        let stem = input.file_stem().unwrap().to_string_lossy();
        fs::write(dir.join(format!("{}.{}", stem, self.ext)), b"anotado")?;
        Ok(())
    }

    fn output_extension(&self) -> &str {
        self.ext
    }
}

pub fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn dir_is_empty(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}
