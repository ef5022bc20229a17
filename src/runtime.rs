//! Service runtime: the RPC loop and the broker consumer, supervised
//! independently so a fault in one never takes down the other.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broker::IngestConsumer;
use crate::config::INGEST_QUEUE;
use crate::core::errors::RagError;
use crate::server;
use crate::state::AppState;

pub struct ServiceRuntime {
    state: Arc<AppState>,
}

impl ServiceRuntime {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Serve until shutdown. On a shutdown signal the RPC loop drains
    /// in-flight requests while the consumer finishes its current task and
    /// disconnects; both must settle before this returns.
    pub async fn run(&self) -> Result<(), RagError> {
        let shutdown = CancellationToken::new();

        let consumer = IngestConsumer::new(
            self.state.config.rabbitmq_url.clone(),
            INGEST_QUEUE.to_string(),
            self.state.ingestion.clone(),
        );
        let consumer_shutdown = shutdown.clone();
        let consumer_task = tokio::spawn(async move {
            consumer.run(consumer_shutdown).await;
        });

        let listener = TcpListener::bind(&self.state.config.bind_addr)
            .await
            .map_err(RagError::internal)?;
        let addr = listener.local_addr().map_err(RagError::internal)?;
        tracing::info!("listening on {}", addr);

        let app = server::router::router(self.state.clone());
        let serve_shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                tracing::info!("shutdown requested, draining");
                serve_shutdown.cancel();
            })
            .await
            .map_err(RagError::internal)?;

        shutdown.cancel();
        if let Err(err) = consumer_task.await {
            tracing::error!("consumer task aborted: {}", err);
        }

        tracing::info!("stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
