//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Listener, server and connection tasks produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ID flows through every per-connection event
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
