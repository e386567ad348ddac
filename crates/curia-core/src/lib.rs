//! # curia-core
//!
//! Core types, traits, and abstractions for curia.
//!
//! This crate provides the data model shared by the differ, the merge
//! strategies, the curation controller and the suggestion ranker, together
//! with the port traits their external collaborators implement.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    CollectingProgressSink, CurationEvent, EventBus, EventBusProgressSink, EventEnvelope,
    FanoutProgressSink, TracingProgressSink,
};
pub use models::*;
pub use traits::*;
