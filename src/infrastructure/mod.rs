// Exchange tick source adapters (WebSocket, polled REST, scripted replay)
pub mod exchange;

// Push-based metrics
pub mod observability;

// Score oracle client
pub mod oracle;

// Append-only persistence sinks and historical store
pub mod persistence;
