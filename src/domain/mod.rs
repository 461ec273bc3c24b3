// Compliance domain (status, violations, corrective actions, reports)
pub mod compliance;

// Domain-specific error types
pub mod errors;

// Pipeline events and persistence envelopes
pub mod events;

// Aggregated market state and regime classification
pub mod market;

// Port interfaces
pub mod ports;

// Trading signals and effective gate thresholds
pub mod signal;

// Rolling statistics shared by health scoring, regime detection and signals
pub mod stats;

// Simulated trading domain (positions, snapshots, outcomes)
pub mod trading;

// Core market data types
pub mod types;
