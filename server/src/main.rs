mod config;
mod error;
mod handlers;
mod pages;
mod registry;
mod state;
mod worker;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use common::{Detector, YoloCliDetector};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::registry::TaskRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();

    // RUST_LOG manda; si no está, POTHOLE_LOG o el default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cfg.ensure_dirs()?;

    let registry = TaskRegistry::load(
        cfg.upload_dir.clone(),
        cfg.output_dir.clone(),
        cfg.tasks_file.clone(),
    )?;

    // el modelo se carga una sola vez; sin modelo el server igual arranca
    let detection = match YoloCliDetector::load(&cfg.yolo_bin, &cfg.model_path, &cfg.output_ext) {
        Ok(detector) => {
            info!("modelo cargado: {}", detector.model_path().display());
            let detector: Arc<dyn Detector> = Arc::new(detector);
            Some(worker::start(
                detector,
                registry.clone(),
                cfg.workers,
                cfg.queue_capacity,
            ))
        }
        Err(e) => {
            error!("no se pudo cargar el modelo: {}", e);
            warn!("la app sigue corriendo pero las detecciones no van a funcionar");
            None
        }
    };

    let bind = cfg.bind_address.clone();
    info!(
        "modo {:?}, uploads={} outputs={}",
        cfg.mode,
        cfg.upload_dir.display(),
        cfg.output_dir.display()
    );

    let state = AppState::new(cfg, registry, detection);
    let app = handlers::build_router(state);

    let listener = TcpListener::bind(&bind).await?;
    info!("server escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server detenido");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("no se pudo instalar el handler de Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("señal de apagado recibida");
}
