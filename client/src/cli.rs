use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{CheckResultResponse, ErrorResponse, TaskInfo, TaskStatus, UploadResponse};
use reqwest::{multipart, Client, Response};
use std::{env, path::PathBuf, time::Duration};

/// - En Docker: POTHOLE_URL=http://server:5000
/// - Local: default http://localhost:5000
fn server_base_url() -> String {
    env::var("POTHOLE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para subir videos al detector de baches")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sube un video y lanza la detección
    Upload {
        #[arg(value_name = "VIDEO")]
        path: PathBuf,

        /// Espera a que termine consultando el estado
        #[arg(long)]
        wait: bool,

        /// Segundos entre consultas con --wait
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Consulta el estado de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Lista todas las tareas conocidas por el server
    Tasks,
    /// Descarga un video anotado de outputs/
    Download {
        #[arg(value_name = "ARCHIVO")]
        filename: String,

        /// Ruta de salida (por defecto el mismo nombre en el directorio actual)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = server_base_url();

    match cli.command {
        Commands::Upload { path, wait, interval } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("no se pudo leer {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let form = multipart::Form::new()
                .part("video", multipart::Part::bytes(bytes).file_name(name));

            let url = format!("{}/upload", base_url);
            let resp = client.post(&url).multipart(form).send().await?;
            let resp = error_for_status(resp).await?;
            let up: UploadResponse = resp
                .json()
                .await
                .context("respuesta inesperada (¿el server está en modo sync?)")?;

            println!("Video subido:");
            println!("  task_id: {}", up.task_id);
            println!("  salida : {}", up.output_filename);
            println!("  mensaje: {}", up.message);

            if wait {
                let result = wait_for(&client, &base_url, &up.task_id, interval).await?;
                print_check(&up.task_id, &result);
                if result.status == TaskStatus::Failed {
                    std::process::exit(1);
                }
            }
        }

        Commands::Status { id } => {
            let result = check(&client, &base_url, &id).await?;
            print_check(&id, &result);
        }

        Commands::Tasks => {
            let url = format!("{}/api/v1/tasks", base_url);
            let resp = error_for_status(client.get(&url).send().await?).await?;
            let tasks: Vec<TaskInfo> = resp.json().await?;

            if tasks.is_empty() {
                println!("No hay tareas registradas.");
            }
            for t in tasks {
                println!("Tarea {}", t.id);
                println!("  archivo   : {}", t.original_filename);
                println!("  estado    : {:?}", t.status);
                println!("  salida    : {}", t.output_filename);
                println!("  enviada   : {}", t.submitted_at);
                if let Some(ref started) = t.started_at {
                    println!("  iniciada  : {}", started);
                }
                if let Some(ref done) = t.finished_at {
                    println!("  finalizada: {}", done);
                }
                if let Some(ref err) = t.error {
                    println!("  error     : {}", err);
                }
                println!();
            }
        }

        Commands::Download { filename, output } => {
            let url = format!("{}/outputs/{}", base_url, filename);
            let resp = error_for_status(client.get(&url).send().await?).await?;
            let bytes = resp.bytes().await?;

            let out = output.unwrap_or_else(|| PathBuf::from(&filename));
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("no se pudo escribir {}", out.display()))?;
            println!("Descargado {} ({} bytes)", out.display(), bytes.len());
        }
    }

    Ok(())
}

async fn check(client: &Client, base_url: &str, id: &str) -> Result<CheckResultResponse> {
    let url = format!("{}/check_result/{}", base_url, id);
    let resp = error_for_status(client.get(&url).send().await?).await?;
    Ok(resp.json().await?)
}

async fn wait_for(
    client: &Client,
    base_url: &str,
    id: &str,
    interval: u64,
) -> Result<CheckResultResponse> {
    loop {
        let result = check(client, base_url, id).await?;
        if result.status.is_finished() {
            return Ok(result);
        }
        println!("  ... {:?}", result.status);
        tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
    }
}

fn print_check(id: &str, result: &CheckResultResponse) {
    println!("Tarea {}:", id);
    println!("  estado: {:?}", result.status);
    if let Some(ref url) = result.output_url {
        println!("  video : {}", url);
    }
    if let Some(ref err) = result.error {
        println!("  error : {}", err);
    }
}

// Los errores del server vienen como {success: false, error}
async fn error_for_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => bail!("el server respondió {}: {}", status, err.error),
        Err(_) => bail!("el server respondió {}", status),
    }
}
