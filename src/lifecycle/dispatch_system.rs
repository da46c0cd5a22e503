use crate::broker::{Broker, Topology};
use crate::config::DispatchConfig;
use crate::consumer::ConsumerLoop;
use crate::fatal::FatalHook;
use crate::processor::OrderProcessor;
use crate::readiness::readiness_gate;
use crate::store::{empty_slot, OrderStore, StoreSlot};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, SupervisorHandle};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Errors surfaced while stopping the system.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// The runtime orchestrator for the dispatcher.
///
/// `DispatchSystem` is responsible for:
/// - **Wiring**: connecting supervisor, gate, consumer and processor
/// - **Lifecycle**: spawning the three long-running tasks and stopping them
/// - **Priming**: sending the synthetic first closure notice that forces the initial connect
///
/// # Tasks
///
/// - **Supervisor**: reconnects the broker and redeclares topology
/// - **Store bootstrap**: connects the store once, in the background
/// - **Consumer**: subscribes on every ready channel and processes deliveries
///
/// # Example
///
/// ```ignore
/// let system = DispatchSystem::start(&config, broker, bootstrap, rng, Arc::new(ExitProcess));
/// wait_for_shutdown_signal().await?;
/// system.shutdown().await?;
/// ```
pub struct DispatchSystem<S> {
    supervisor: SupervisorHandle,
    store: StoreSlot<S>,
    shutdown: CancellationToken,
    bootstrap: JoinHandle<()>,
    handles: Vec<JoinHandle<()>>,
}

impl<S: OrderStore> DispatchSystem<S> {
    /// Spawns every task and primes the supervisor.
    ///
    /// `store_bootstrap` resolves to a connected store; the processor skips persistence until
    /// it does.
    pub fn start<B, R, F>(
        config: &DispatchConfig,
        broker: B,
        store_bootstrap: F,
        rng: R,
        fatal: Arc<dyn FatalHook>,
    ) -> Self
    where
        B: Broker,
        R: Rng + Send + 'static,
        F: Future<Output = S> + Send + 'static,
    {
        let topology = Topology::default();
        let shutdown = CancellationToken::new();

        // 1. Readiness handoff between supervisor and consumer
        let (publisher, gate) = readiness_gate();

        // 2. Supervisor owns the connection
        let (supervisor, handle) = ConnectionSupervisor::new(
            broker,
            topology.clone(),
            config.broker_retry_delay,
            publisher,
            fatal.clone(),
            shutdown.clone(),
        );

        // 3. Store slot, written once by the bootstrap task
        let store = empty_slot();
        let slot = store.clone();
        let bootstrap = tokio::spawn(async move {
            let connected = store_bootstrap.await;
            if slot.set(connected).is_err() {
                error!("Store slot already filled");
            }
        });

        // 4. Consumer drives the processor
        let processor = OrderProcessor::new(store.clone(), config.error_percent, rng);
        let consumer = ConsumerLoop::new(gate, topology.queue, processor, fatal, shutdown.clone());

        let handles = vec![tokio::spawn(supervisor.run()), tokio::spawn(consumer.run())];

        // 5. Force the first connect
        handle.reconnect("initial connect");
        info!(error_percent = config.error_percent, "Dispatch system started");

        Self {
            supervisor: handle,
            store,
            shutdown,
            bootstrap,
            handles,
        }
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.state()
    }

    /// `true` once the store bootstrap has finished.
    pub fn store_connected(&self) -> bool {
        self.store.initialized()
    }

    /// Stops every task. There is no drain: an in-flight message finishes, nothing else is read.
    ///
    /// # Shutdown Process
    ///
    /// 1. Send the intentional-shutdown notice to the supervisor
    /// 2. Cancel the token the supervisor and consumer select on
    /// 3. Abort the store bootstrap, which may still be retrying
    /// 4. Wait for the supervisor and consumer to finish
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        info!("Shutting down dispatch system...");
        self.supervisor.shutdown();
        self.shutdown.cancel();
        self.bootstrap.abort();

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Task failed");
                return Err(e.into());
            }
        }

        info!("Dispatch system stopped.");
        Ok(())
    }
}
