use crate::config::Settings;
use crate::labels::Emotion;
use crate::ort_service::OrtModelService;
use crate::pipeline;
use crate::source::FileFrameSource;
use std::error::Error;
use tokio::{
    signal,
    sync::{broadcast, watch},
    task::JoinHandle,
};

pub async fn start_app(config: Settings) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to load emotion model: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let (shutdown_tx, _) = broadcast::channel(1);

    let pipeline = pipeline::start(model_service, shutdown_tx.subscribe());
    let display_handle = spawn_display(pipeline.labels());

    let source = FileFrameSource::new(&config.source);
    let source_handle = source.start(pipeline.intake(), shutdown_tx.subscribe());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match source_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Frame source stopped with error: {:?}", e),
        Err(e) => tracing::warn!("Frame source task failed: {:?}", e),
    }

    pipeline.shutdown().await?;
    let _ = display_handle.await;

    Ok(())
}

// Stand-in for the UI: runs on its own task and only ever observes the
// latest label, so a slow display can never hold up frame processing.
fn spawn_display(mut labels: watch::Receiver<Emotion>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while labels.changed().await.is_ok() {
            let label = *labels.borrow_and_update();
            tracing::info!(emotion = %label, "detected emotion");
        }
    })
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
