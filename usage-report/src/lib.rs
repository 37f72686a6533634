pub mod pipeline;
pub mod config;
pub mod sources;
pub mod sinks;
pub mod transform;
pub mod observability;
pub mod run;

pub use pipeline::{Envelope, Pipeline};
