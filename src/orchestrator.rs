//! Service lifecycle.
//!
//! `Stopped -> Connecting -> Running -> Draining -> Stopped`. Startup fails
//! unless the bus consumer, the bus producer and the job queue all connect.
//! Draining stops consumption first, lets in-flight jobs finish, flushes
//! pending status events and only then disconnects the consumer and the
//! producer, in that order.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::create_app;
use crate::common::error::OrchestratorError;
use crate::infrastructure::bus::{MessageBus, MessageStream};
use crate::modules::transcode::publisher::StatusPublisher;
use crate::routes::{self, Disposition, IngestRouter};
use crate::shutdown::ShutdownSignal;
use crate::state::AppState;
use crate::workers::transcoder::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Connecting,
    Running,
    Draining,
}

struct HttpServer {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Orchestrator {
    state: AppState,
}

impl Orchestrator {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn set(&self, lifecycle: LifecycleState) {
        debug!(?lifecycle, "Lifecycle transition");
        self.state.lifecycle.send_replace(lifecycle);
    }

    /// Runs until the first shutdown signal (or the signal channel closing),
    /// then drains. A further signal during the drain abandons in-flight work.
    pub async fn run(
        self,
        mut shutdown: mpsc::Receiver<ShutdownSignal>,
    ) -> Result<(), OrchestratorError> {
        self.set(LifecycleState::Connecting);
        if let Err(e) = self.connect().await {
            self.set(LifecycleState::Stopped);
            return Err(e);
        }

        let router = Arc::new(routes::configure_topics(&self.state));
        let startup = async {
            let http = self.start_http().await?;
            let stream = self
                .state
                .bus
                .subscribe(&router.topics())
                .await
                .map_err(OrchestratorError::Subscribe)?;
            Ok::<_, OrchestratorError>((http, stream))
        };
        let (http, stream) = match startup.await {
            Ok(started) => started,
            Err(e) => {
                self.disconnect_bus().await;
                self.set(LifecycleState::Stopped);
                return Err(e);
            }
        };

        let config = &self.state.config;
        let (publisher, mut publisher_task) =
            StatusPublisher::spawn(Arc::clone(&self.state.bus), config.status_buffer);
        let mut pool = WorkerPool::new(
            Arc::clone(&self.state.queue),
            Arc::clone(&self.state.transcoder),
            publisher.clone(),
            config.worker_concurrency,
            config.rate_limit_max,
            config.rate_limit_window(),
        )
        .spawn();

        let stop_ingest = CancellationToken::new();
        let mut ingest_task = tokio::spawn(ingest(
            Arc::clone(&self.state.bus),
            router,
            stream,
            stop_ingest.clone(),
        ));

        self.set(LifecycleState::Running);
        info!("🚀 Orchestrator running");

        let ingest_ended = tokio::select! {
            signal = shutdown.recv() => {
                match signal {
                    Some(signal) => info!(?signal, "Shutdown requested"),
                    None => info!("Shutdown channel closed"),
                }
                false
            }
            _ = &mut ingest_task => {
                warn!("Bus subscription ended, draining");
                true
            }
        };

        self.set(LifecycleState::Draining);
        stop_ingest.cancel();

        let queue = Arc::clone(&self.state.queue);
        let drain = async {
            if !ingest_ended {
                if let Err(e) = (&mut ingest_task).await {
                    error!("Ingest task failed: {}", e);
                }
            }
            queue.close();
            pool.join().await;
            drop(publisher);
            if let Err(e) = (&mut publisher_task).await {
                error!("Status publisher failed: {}", e);
            }
        };
        let drained = tokio::select! {
            _ = drain => true,
            _ = next_signal(&mut shutdown) => false,
        };
        if !drained {
            warn!("Abandoning in-flight jobs");
            ingest_task.abort();
            self.state.queue.close();
            pool.abort();
            publisher_task.abort();
        }

        self.disconnect_bus().await;
        if let Some(http) = http {
            http.stop.cancel();
            if let Err(e) = http.task.await {
                warn!("Status server task failed: {}", e);
            }
        }

        self.set(LifecycleState::Stopped);
        info!("Orchestrator stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<(), OrchestratorError> {
        let bus = &self.state.bus;
        bus.connect_consumer()
            .await
            .map_err(OrchestratorError::ConsumerConnect)?;

        if let Err(e) = bus.connect_producer().await {
            self.disconnect_bus().await;
            return Err(OrchestratorError::ProducerConnect(e));
        }

        if let Err(e) = self.state.queue.connect().await {
            self.disconnect_bus().await;
            return Err(OrchestratorError::QueueConnect(e));
        }

        Ok(())
    }

    async fn disconnect_bus(&self) {
        if let Err(e) = self.state.bus.disconnect_consumer().await {
            warn!("Failed to disconnect consumer: {}", e);
        }
        if let Err(e) = self.state.bus.disconnect_producer().await {
            warn!("Failed to disconnect producer: {}", e);
        }
    }

    async fn start_http(&self) -> Result<Option<HttpServer>, OrchestratorError> {
        let port = self.state.config.server_port;
        if port == 0 {
            return Ok(None);
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(OrchestratorError::StatusServer)?;
        info!("Status server running on http://0.0.0.0:{}", port);

        let app = create_app(self.state.clone());
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!("Status server failed: {}", e);
            }
        });

        Ok(Some(HttpServer { stop, task }))
    }
}

/// Resolves on the next signal. A closed channel never resolves.
async fn next_signal(shutdown: &mut mpsc::Receiver<ShutdownSignal>) {
    if shutdown.recv().await.is_none() {
        std::future::pending::<()>().await;
    }
}

async fn ingest(
    bus: Arc<dyn MessageBus>,
    router: Arc<IngestRouter>,
    mut stream: MessageStream,
    stop: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = stream.next() => match next {
                Some(message) => message,
                None => break,
            },
        };

        if message.redelivered {
            debug!(delivery_tag = message.delivery_tag, "Handling redelivered message");
        }

        let settled = match router.dispatch(&message.topic, &message.payload).await {
            Disposition::Ack => bus.ack(&message).await,
            Disposition::Requeue => bus.reject(&message, true).await,
        };
        if let Err(e) = settled {
            warn!(delivery_tag = message.delivery_tag, "Failed to settle message: {}", e);
        }
    }
    info!("Stopped consuming");
}
