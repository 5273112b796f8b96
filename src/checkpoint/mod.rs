pub mod client;
pub mod http;
pub mod types;

pub use client::{CheckpointClient, CheckpointSession, ClientSettings};
pub use http::HttpBackend;
pub use types::{
    BackendSessionId, CheckpointError, CheckpointRequest, CheckpointResult, CheckpointStatus,
    CheckpointUpload, ClientResult, CloseReport, Environment, StepReport, VisualBackend,
};
