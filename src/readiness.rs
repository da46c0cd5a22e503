//! # Readiness Gate
//!
//! Single-slot handoff of a freshly declared broker channel from the
//! [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor) to the
//! [`ConsumerLoop`](crate::consumer::ConsumerLoop).
//!
//! The channel handle travels inside the signal, so the consumer can only ever see a channel
//! after the supervisor finished declaring topology on it. [`ReadinessPublisher::publish`]
//! does not return until the consumer has taken the handle, which serializes reconnect cycles
//! with subscription restarts.

use tokio::sync::{mpsc, oneshot};

/// The consumer side went away.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
#[error("Readiness gate closed")]
pub struct GateClosed;

struct Handoff<C> {
    channel: C,
    taken: oneshot::Sender<()>,
}

/// Supervisor half of the gate.
pub struct ReadinessPublisher<C> {
    sender: mpsc::Sender<Handoff<C>>,
}

/// Consumer half of the gate.
pub struct ReadinessGate<C> {
    receiver: mpsc::Receiver<Handoff<C>>,
}

/// Creates a connected publisher/gate pair.
pub fn readiness_gate<C: Send>() -> (ReadinessPublisher<C>, ReadinessGate<C>) {
    let (sender, receiver) = mpsc::channel(1);
    (ReadinessPublisher { sender }, ReadinessGate { receiver })
}

impl<C: Send> ReadinessPublisher<C> {
    /// Hands `channel` over and waits until the consumer has taken it.
    pub async fn publish(&self, channel: C) -> Result<(), GateClosed> {
        let (taken, confirmation) = oneshot::channel();
        self.sender
            .send(Handoff { channel, taken })
            .await
            .map_err(|_| GateClosed)?;
        confirmation.await.map_err(|_| GateClosed)
    }
}

impl<C: Send> ReadinessGate<C> {
    /// Blocks until the next ready channel arrives. `None` once the publisher is dropped.
    pub async fn wait(&mut self) -> Option<C> {
        let handoff = self.receiver.recv().await?;
        // Publisher stops waiting on its own if this fails.
        let _ = handoff.taken.send(());
        Some(handoff.channel)
    }
}
