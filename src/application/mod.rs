pub mod engine;
pub mod matcher;
pub mod signer;
pub mod sync;
pub mod tracker;
pub mod uploader;

pub use engine::{BatchReport, EngineConfig, EngineEvent, Timings, WorkflowEngine};
pub use uploader::Uploader;
