//! HTTP transfer layer.
//!
//! - [`handler`] - routing, method handling and status mapping
//! - [`conditional`] - `If-Match` / `If-None-Match` / date preconditions
//! - [`content_type`] - download content type resolution
//! - [`upload`] - multipart form uploads with optional progress events
//! - [`server`] - the hyper accept loop

pub mod conditional;
pub mod content_type;
pub mod handler;
pub mod server;
pub mod upload;

pub use handler::{error_status, handle_request, GatewayBody, GatewayState};
pub use server::GatewayServer;
pub use upload::UploadEvent;
