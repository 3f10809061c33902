//! Coordinator integration
//!
//! - Request signing with the worker's shared secret
//! - HTTP binding of the coordinator port

pub mod http_client;
pub mod signature;

pub use http_client::{parse_control_message, parse_work_response, HttpCoordinatorClient};
pub use signature::{RequestSigner, SignedPath};
