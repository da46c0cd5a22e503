//! # Order Dispatch
//!
//! > **A crash-tolerant order consumer for chaos testing.**
//!
//! This crate drains order events from a durable RabbitMQ queue, upserts each one into
//! MongoDB, and can deliberately crash the process at a configurable rate so that the
//! orchestration around it (restart policies, crash-loop detection) can be exercised.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Single writer, explicit handoff
//!
//! Two handles cross task boundaries: the broker channel and the store client. Neither is a
//! global. Each has one writer and one reader, and the handoff itself is the synchronization:
//! - The supervisor declares topology on a channel, *then* sends that channel through the
//!   [`readiness`] gate. The consumer only ever subscribes on what it received there.
//! - The store bootstrap sets a write-once cell the processor reads.
//!
//! ### Fail fast on what we cannot fix
//!
//! Connectivity is retried forever. Broken broker provisioning (exchange, queue, binding) and
//! a refused subscription are [`fatal::Fatal`]: the process exits and lets its supervisor
//! restart it. Fatal conditions go through an injectable [`fatal::FatalHook`], so tests
//! record them instead of dying.
//!
//! ### Auto-ack, on purpose
//!
//! Messages are consumed with automatic acknowledgment. A message that fails to parse or to
//! persist is gone; so is the one being processed when the fault injector fires. That loss is
//! the point of the chaos knob.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Broker ([`broker`])
//! Traits for dialing, declaring topology and subscribing, plus the `lapin` implementation.
//!
//! ### 2. The Supervisor ([`supervisor`])
//! The reconnect state machine driven by closure notifications.
//! - **Key items**: [`ConnectionSupervisor`](supervisor::ConnectionSupervisor),
//!   [`ConnectionState`](supervisor::ConnectionState).
//!
//! ### 3. The Handoff ([`readiness`])
//! Rendezvous between supervisor and consumer.
//!
//! ### 4. The Pipeline ([`consumer`], [`processor`], [`store`], [`model`])
//! Subscribe, parse, persist, sleep, maybe crash.
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! Wires everything and owns shutdown.
//! - **Key items**: [`DispatchSystem`](lifecycle::DispatchSystem),
//!   [`setup_tracing`](lifecycle::setup_tracing).
//!
//! ### 6. Testing ([`mock`])
//! Scripted broker, in-memory store and a recording fatal hook.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! AMQP_HOST=localhost MONGO_HOST=localhost DISPATCH_ERROR_PERCENT=5 RUST_LOG=info cargo run
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod fatal;
pub mod lifecycle;
pub mod mock;
pub mod model;
pub mod processor;
pub mod readiness;
pub mod store;
pub mod supervisor;
