pub mod client;
pub mod normalize;
pub mod orchestrator;
pub mod types;

pub use client::{RemoteError, RemoteJobClient};
pub use normalize::normalize_result;
pub use orchestrator::{JobOptions, JobOrchestrator, JobSettings};
pub use types::*;
