//! Push-based observability: Prometheus metrics encoded to structured logs.
//! No HTTP server, no incoming connections.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
