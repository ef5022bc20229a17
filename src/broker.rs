//! Broker consumer for ingestion tasks.
//!
//! At-least-once delivery: a task is acknowledged only after the pipeline has
//! returned, success or classified failure, and at most one task is in flight
//! per consumer (prefetch 1). A task that fails is logged and dropped rather
//! than redelivered forever; dead-lettering is the broker's policy.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::errors::RagError;
use crate::ingest::IngestionPipeline;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const CONSUMER_TAG: &str = "rag-ingest";

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionTask {
    #[serde(default = "unknown_task_id")]
    pub task_id: String,
    #[serde(default)]
    pub file_path: String,
}

fn unknown_task_id() -> String {
    "unknown".to_string()
}

pub struct IngestConsumer {
    url: String,
    queue: String,
    pipeline: Arc<IngestionPipeline>,
}

impl IngestConsumer {
    pub fn new(url: String, queue: String, pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            url,
            queue,
            pipeline,
        }
    }

    /// Drive the consumer until shutdown. Exhausted connection retries leave
    /// the consumer dormant; the rest of the process keeps serving.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(connection) = self.connect(&shutdown).await else {
            if !shutdown.is_cancelled() {
                tracing::error!("could not connect to broker; ingestion disabled");
            }
            return;
        };

        if let Err(err) = self.consume(&connection, &shutdown).await {
            tracing::error!("consumer stopped: {}", err);
        }

        if let Err(err) = connection.close(0, "shutting down").await {
            tracing::debug!("broker close: {}", err);
        }
    }

    async fn connect(&self, shutdown: &CancellationToken) -> Option<Connection> {
        for attempt in 1..=CONNECT_ATTEMPTS {
            match Connection::connect(&self.url, ConnectionProperties::default()).await {
                Ok(connection) => {
                    tracing::info!("connected to broker");
                    return Some(connection);
                }
                Err(err) => {
                    tracing::warn!(
                        "waiting for broker (attempt {}/{}): {}",
                        attempt,
                        CONNECT_ATTEMPTS,
                        err
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
            }
        }

        None
    }

    async fn consume(
        &self,
        connection: &Connection,
        shutdown: &CancellationToken,
    ) -> Result<(), RagError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(RagError::connectivity)?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(RagError::connectivity)?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(RagError::connectivity)?;

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(RagError::connectivity)?;

        tracing::info!("consuming from {}", self.queue);

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = consumer.next() => delivery,
            };

            let Some(delivery) = delivery else { break };
            let delivery = delivery.map_err(RagError::connectivity)?;

            // Process first, ack after; the in-flight task completes even if
            // shutdown is requested meanwhile.
            self.handle_delivery(&delivery.data).await;
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(RagError::connectivity)?;
        }

        Ok(())
    }

    async fn handle_delivery(&self, body: &[u8]) {
        let task: IngestionTask = match serde_json::from_slice(body) {
            Ok(task) => task,
            Err(err) => {
                tracing::error!("malformed ingestion task: {}", err);
                return;
            }
        };

        tracing::info!("processing task {}: {}", task.task_id, task.file_path);
        match self.pipeline.ingest(&task.file_path).await {
            Ok(()) => tracing::info!("task {} completed", task.task_id),
            Err(err) => tracing::error!("task {} failed: {}", task.task_id, err),
        }
    }
}
