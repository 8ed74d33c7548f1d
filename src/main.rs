use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use uuid::Uuid;

use lume_backend::{
    apiserver::create_api_router,
    engine::hardware::HttpDispatcher,
    model::{ShowModel, device::ControllerEndpoint, settings::ShowSettings},
    start_backend,
};

#[derive(Parser, Debug)]
#[command(version, about = "Show choreography backend for firing controllers")]
struct Args {
    /// Show document to import at startup.
    #[arg(long)]
    show: Option<PathBuf>,

    /// JSON settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Controller endpoint as `<uuid>=<host:port>`. Repeatable.
    #[arg(long = "controller", value_parser = parse_controller)]
    controllers: Vec<ControllerEndpoint>,
}

fn parse_controller(value: &str) -> Result<ControllerEndpoint, String> {
    let (id, address) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <uuid>=<host:port>, got '{value}'"))?;
    let id = Uuid::parse_str(id.trim()).map_err(|e| format!("invalid controller id: {e}"))?;
    let address = address.trim();
    if address.is_empty() {
        return Err("controller address is empty".to_string());
    }
    Ok(ControllerEndpoint {
        id,
        name: id.to_string(),
        address: address.to_string(),
    })
}

async fn load_settings(path: Option<&PathBuf>) -> Result<ShowSettings, anyhow::Error> {
    let Some(path) = path else {
        return Ok(ShowSettings::default());
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings = serde_json::from_str(&content)
        .with_context(|| format!("Invalid settings file {}", path.display()))?;
    log::info!("Settings loaded from: {}", path.display());
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let args = Args::parse();

    let settings = load_settings(args.settings.as_ref()).await?;
    let dispatcher = Arc::new(HttpDispatcher::new(Duration::from_millis(
        settings.network.dispatch_timeout_ms,
    )));
    let model = ShowModel {
        controllers: args.controllers,
        settings,
        ..ShowModel::default()
    };

    let backend = start_backend(model, dispatcher);
    if let Some(path) = &args.show {
        backend.model_manager.load_from_file(path).await?;
    }

    let router = create_api_router(
        backend.scheduler_tx.clone(),
        backend.state_rx.clone(),
        backend.event_tx.clone(),
        backend.model_manager.clone(),
    );
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    log::info!("API server listening on {}", args.bind);
    axum::serve(listener, router).await?;

    Ok(())
}
