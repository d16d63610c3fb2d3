use crate::classifier::OrtClassifier;
use crate::config::Settings;
use crate::labels::LabelMap;
use crate::scratch::ScratchStore;
use crate::server::HttpServer;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Settings) -> Result<(), Box<dyn Error>> {
    let label_map = match LabelMap::from_file(&config.labels.get_path()) {
        Ok(map) => map,
        Err(e) => {
            tracing::error!("Failed to load label map: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let classifier: Arc<OrtClassifier> = match OrtClassifier::new(&config.model, label_map) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Failed to initialize classifier: {:?}", e);
            return Err(e);
        }
    };

    let scratch = match ScratchStore::new(&config.storage.scratch_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to prepare scratch directory: {:?}", e);
            return Err(Box::new(e));
        }
    };

    tracing::info!(
        "App started: {} v{}",
        config.application.name,
        config.application.version
    );

    let server = HttpServer::new(classifier, scratch, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
