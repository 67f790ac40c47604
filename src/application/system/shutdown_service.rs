use crate::infrastructure::broker::EventProducer;
use crate::infrastructure::observability::TelemetryPublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Extra time the publisher loop gets on top of its own grace period
const LOOP_EXIT_MARGIN: Duration = Duration::from_millis(500);

pub struct ShutdownService {
    shutdown_tx: watch::Sender<bool>,
    publisher: Option<Arc<TelemetryPublisher>>,
    publisher_task: Option<JoinHandle<()>>,
    scrape_task: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    producer: Arc<EventProducer>,
    grace: Duration,
}

impl ShutdownService {
    pub fn new(
        shutdown_tx: watch::Sender<bool>,
        publisher: Option<Arc<TelemetryPublisher>>,
        publisher_task: Option<JoinHandle<()>>,
        scrape_task: Option<JoinHandle<()>>,
        background: Vec<JoinHandle<()>>,
        producer: Arc<EventProducer>,
        grace: Duration,
    ) -> Self {
        Self {
            shutdown_tx,
            publisher,
            publisher_task,
            scrape_task,
            background,
            producer,
            grace,
        }
    }

    pub async fn shutdown(self) {
        info!("Initiating Graceful Shutdown Sequence...");

        // 1. Stop scheduling
        info!("Step 1: Signalling shutdown to background tasks...");
        if let Some(publisher) = &self.publisher {
            publisher.close();
        }
        self.shutdown_tx.send_replace(true);

        // 2. Drain the in-flight push
        if let Some(task) = self.publisher_task {
            info!(
                "Step 2: Waiting up to {:?} for the in-flight push...",
                self.grace
            );
            await_or_abort("publisher", task, self.grace + LOOP_EXIT_MARGIN).await;
        } else {
            info!("Step 2: No publisher running.");
        }

        // 3. Stop the scrape server
        if let Some(task) = self.scrape_task {
            info!("Step 3: Stopping scrape server...");
            await_or_abort("scrape server", task, self.grace).await;
        } else {
            info!("Step 3: No scrape server running.");
        }

        for task in self.background {
            await_or_abort("background task", task, self.grace).await;
        }

        // 4. Close the producer
        info!("Step 4: Closing event producer...");
        self.producer.close().await;

        info!("Graceful Shutdown Complete. Goodbye!");
    }
}

async fn await_or_abort(name: &str, mut task: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(())) => info!("Shutdown: {} stopped.", name),
        Ok(Err(e)) if e.is_cancelled() => warn!("Shutdown: {} was cancelled.", name),
        Ok(Err(e)) => error!("Shutdown: {} panicked: {}", name, e),
        Err(_) => {
            warn!("Shutdown: {} did not stop within {:?}, aborting.", name, limit);
            task.abort();
        }
    }
}
