use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use filmstrip::scanner;
use filmstrip::{
    DeliveryConfig, DeliveryService, FileDecoder, LocalEngine, SessionStatus, ViewportGeometry,
};

#[derive(Parser, Debug)]
#[command(
    name = "filmstrip",
    version,
    about = "Progressive thumbnail delivery for a media folder"
)]
struct Cli {
    /// Folder to open
    folder: PathBuf,

    /// Include images in subfolders
    #[arg(short, long)]
    recursive: bool,

    /// Number of filmstrip slots visible at once
    #[arg(long, default_value_t = 12)]
    visible: usize,

    /// Open the image at this index and preload its neighbours
    #[arg(long)]
    navigate: Option<usize>,

    /// Thumbnail cache directory (defaults to the XDG cache dir)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Thumbnail worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Full-resolution images kept in memory
    #[arg(long)]
    capacity: Option<usize>,
}

impl Cli {
    fn config(&self) -> DeliveryConfig {
        let mut config = DeliveryConfig::from_env();
        if let Some(workers) = self.workers {
            config = config.workers(workers);
        }
        if let Some(capacity) = self.capacity {
            config = config.cache_capacity(capacity);
        }
        if let Some(dir) = &self.cache_dir {
            config = config.cache_dir(dir.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filmstrip=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let folder = cli
        .folder
        .canonicalize()
        .with_context(|| format!("Failed to resolve folder: {:?}", cli.folder))?;
    let paths = scanner::scan(folder.clone(), cli.recursive).await?;
    info!(?folder, count = paths.len(), "Found images");

    let engine = Arc::new(LocalEngine::from_config(&config)?);
    let (service, handle) = DeliveryService::new(Arc::clone(&engine), Arc::new(FileDecoder), &config);
    let actor = service.spawn();

    let count = paths.len();
    handle.activate_folder(folder, paths)?;
    handle.viewport(ViewportGeometry::strip(0.0, cli.visible as f64, 1.0, count))?;
    if let Some(index) = cli.navigate {
        if index < count {
            handle.navigate(index)?;
        } else {
            warn!(index, count, "Navigation index out of range");
        }
    }

    let status = tokio::select! {
        status = handle.wait_for(SessionStatus::is_settled) => status?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling");
            handle.cancel()?;
            handle.wait_for(SessionStatus::is_terminal).await?
        }
    };

    let store = handle.store();
    let cache = handle.image_cache();
    info!(
        phase = ?status.phase,
        thumbnails = store.len(),
        tiers = ?store.tier_counts(),
        resident = cache.len(),
        capacity = cache.capacity(),
        "Session finished"
    );

    handle.shutdown()?;
    actor.await.context("Delivery service task failed")?;
    engine.shutdown();
    Ok(())
}
