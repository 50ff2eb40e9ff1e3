// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod arcs;
pub mod budget;
pub mod classify;
pub mod collect;
pub mod config;
pub mod convergence;
pub mod item;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod synthesize;
pub mod topics;

// ---- Re-exports for stable public API ----
pub use crate::config::PulseConfig;
pub use crate::item::{Classification, ContentType, Item, Sentiment, Source};
pub use crate::pipeline::Pipeline;
pub use crate::store::{MemStore, Store};
