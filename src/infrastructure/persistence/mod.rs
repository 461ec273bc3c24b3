// Append-only JSONL file sink with bounded buffering
pub mod jsonl;

// In-memory sink and historical store (tests, warm starts)
pub mod memory;

pub use jsonl::JsonlSink;
pub use memory::{InMemoryHistory, InMemorySink};
