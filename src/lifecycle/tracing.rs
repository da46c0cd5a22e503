//! # Observability & Tracing
//!
//! [`setup_tracing`] initializes structured logging with the `tracing` crate for the
//! dispatcher binary.
//!
//! ## Configuration
//!
//! Compact format, no module prefix (`with_target(false)`), filtered by `RUST_LOG`. When
//! `RUST_LOG` is unset the filter defaults to `info`.
//!
//! ## What Gets Traced
//!
//! - **Supervisor**: closure notices, dial attempts, topology declarations
//! - **Consumer**: subscription cycles and how many messages each one processed
//! - **Processor**: one `process` span per delivery, store results, dropped orders
//! - **Fatal conditions**: logged at `error` right before the process exits
//!
//! ## Usage Examples
//!
//! ```bash
//! # Connection lifecycle and stored orders
//! RUST_LOG=info cargo run
//!
//! # Also show headers and bodies of every delivery
//! RUST_LOG=debug cargo run
//!
//! # Quiet the broker client, keep the dispatcher verbose
//! RUST_LOG=warn,order_dispatch=debug cargo run
//! ```
//!
//! ## Workflow Trace Example
//!
//! **With `RUST_LOG=info`**:
//!
//! ```text
//! INFO Supervisor started exchange=robot-shop queue=orders
//! WARN Broker connection closed reason="initial connect"
//! INFO Connected to broker attempt=1
//! INFO Topology declared exchange=robot-shop queue=orders routing_key=orders
//! INFO Broker ready, subscribing cycle=1
//! INFO process: Order stored bytes=29 key=o1
//! ```
use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
