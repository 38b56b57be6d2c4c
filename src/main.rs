use log::{info, warn};
use std::error::Error;
use std::sync::Arc;

use irqled::{BackendKind, ControllerConfig, open_lifecycle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("IRQLED_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(ControllerConfig::load_from_file(&config_path)?);

    let (backend, mut lifecycle) = open_lifecycle(config)?;
    match backend {
        BackendKind::Libgpiod => info!("Using {backend} backend"),
        BackendKind::Mock => warn!(
            "Using {backend} backend: no hardware is touched and no button press can arrive"
        ),
    }
    lifecycle.start()?;

    info!("Waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    let report = lifecycle.shutdown()?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
