//! # Connection Supervisor
//!
//! Keeps the broker topology alive across disconnects.
//!
//! The supervisor is driven entirely by [`CloseNotice`]s. Each `Dropped` notice starts one
//! reconnect cycle:
//!
//! 1. Dial until it succeeds, sleeping a fixed delay between attempts.
//! 2. Register the closure sink on the new connection so the next drop lands back here.
//! 3. Open a channel and declare exchange, queue and binding.
//! 4. Hand the channel to the consumer through the [`ReadinessPublisher`].
//!
//! A `Shutdown` notice ends the task without dialing. A failure in step 3 is
//! [`Fatal::Topology`]: broker provisioning is a precondition this service cannot repair.

use crate::broker::{
    declare_topology, Broker, BrokerConnection, ChannelOf, CloseNotice, CloseSender, Topology,
};
use crate::fatal::{Fatal, FatalHook};
use crate::readiness::ReadinessPublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where the supervisor is in its reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    TopologyReady,
}

/// Owns the broker connection and reacts to closure notifications.
pub struct ConnectionSupervisor<B: Broker> {
    broker: B,
    topology: Topology,
    retry_delay: Duration,
    notices: mpsc::UnboundedReceiver<CloseNotice>,
    notifier: CloseSender,
    ready: ReadinessPublisher<ChannelOf<B>>,
    state: watch::Sender<ConnectionState>,
    fatal: Arc<dyn FatalHook>,
    shutdown: CancellationToken,
    connection: Option<B::Connection>,
}

/// Cloneable handle for feeding notices to a running supervisor and observing its state.
#[derive(Clone)]
pub struct SupervisorHandle {
    notifier: CloseSender,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    /// Starts a reconnect cycle. Also used once at startup to force the first connect.
    pub fn reconnect(&self, reason: impl Into<String>) {
        let _ = self.notifier.send(CloseNotice::Dropped(reason.into()));
    }

    /// Asks the supervisor to stop without reconnecting.
    pub fn shutdown(&self) {
        let _ = self.notifier.send(CloseNotice::Shutdown);
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl<B: Broker> ConnectionSupervisor<B> {
    pub fn new(
        broker: B,
        topology: Topology,
        retry_delay: Duration,
        ready: ReadinessPublisher<ChannelOf<B>>,
        fatal: Arc<dyn FatalHook>,
        shutdown: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (notifier, notices) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let supervisor = Self {
            broker,
            topology,
            retry_delay,
            notices,
            notifier: notifier.clone(),
            ready,
            state,
            fatal,
            shutdown,
            connection: None,
        };
        let handle = SupervisorHandle {
            notifier,
            state: state_rx,
        };
        (supervisor, handle)
    }

    /// Runs until a `Shutdown` notice, cancellation, a fatal topology error, or the consumer
    /// going away.
    pub async fn run(mut self) {
        info!(exchange = %self.topology.exchange, queue = %self.topology.queue, "Supervisor started");

        loop {
            let notice = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                notice = self.notices.recv() => notice,
            };
            let reason = match notice {
                Some(CloseNotice::Dropped(reason)) => reason,
                Some(CloseNotice::Shutdown) | None => {
                    info!("Shutdown requested");
                    break;
                }
            };
            warn!(%reason, "Broker connection closed");
            self.state.send_replace(ConnectionState::Disconnected);

            let Some(channel) = self.reconnect().await else {
                break;
            };

            let published = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                published = self.ready.publish(channel) => published,
            };
            if published.is_err() {
                warn!("Consumer gone, stopping supervisor");
                break;
            }
        }

        self.connection = None;
        self.state.send_replace(ConnectionState::Disconnected);
        info!("Supervisor stopped");
    }

    /// One reconnect cycle. `None` means the supervisor must stop.
    async fn reconnect(&mut self) -> Option<ChannelOf<B>> {
        self.state.send_replace(ConnectionState::Connecting);
        let connection = self.dial_until_connected().await?;
        connection.notify_close(self.notifier.clone());

        match self.open_with_topology(&connection).await {
            Ok(channel) => {
                self.connection = Some(connection);
                self.state.send_replace(ConnectionState::TopologyReady);
                info!(
                    exchange = %self.topology.exchange,
                    queue = %self.topology.queue,
                    routing_key = %self.topology.routing_key,
                    "Topology declared"
                );
                Some(channel)
            }
            Err(fatal) => {
                self.fatal.trigger(&fatal);
                None
            }
        }
    }

    async fn open_with_topology(
        &self,
        connection: &B::Connection,
    ) -> Result<ChannelOf<B>, Fatal> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| Fatal::Topology(e.to_string()))?;
        declare_topology(&channel, &self.topology)
            .await
            .map_err(|e| Fatal::Topology(e.to_string()))?;
        Ok(channel)
    }

    /// Dials forever with a fixed delay. `None` only on cancellation.
    async fn dial_until_connected(&self) -> Option<B::Connection> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.broker.dial().await {
                Ok(connection) => {
                    info!(attempt, "Connected to broker");
                    return Some(connection);
                }
                Err(e) => {
                    warn!(attempt, error = %e, delay = ?self.retry_delay, "Reconnecting to broker");
                }
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}
