//! # System Lifecycle & Orchestration
//!
//! Individual components are simple; wiring them together is where the ordering rules live.
//! This module starts, primes and stops the dispatcher.
//!
//! **Key Responsibilities:**
//! 1. **Task Creation** - Build supervisor, consumer and processor around shared handles
//! 2. **Dependency Injection** - Broker, store bootstrap, random source and fatal hook come in
//!    from the caller, so tests can swap every one of them
//! 3. **Priming** - Send the synthetic closure notice that triggers the first connect
//! 4. **Shutdown** - Cancel the long-running tasks and wait for them
//! 5. **Observability Setup** - Initialize tracing
//!
//! ## Shared State
//!
//! There are no ambient globals. The two handles crossing task boundaries each have exactly
//! one writer:
//!
//! - the **broker channel** travels supervisor → consumer inside the readiness handoff
//! - the **store client** is set once by the bootstrap task in a `OnceCell` the processor reads
//!
//! ## Shutdown
//!
//! The dispatcher defines no drain. [`DispatchSystem::shutdown`] stops reading, lets the
//! in-flight message finish and returns.

pub mod dispatch_system;
pub mod signals;
pub mod tracing;

pub use self::dispatch_system::*;
pub use self::signals::*;
pub use self::tracing::*;
