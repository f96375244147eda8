//! Unit tests for storage-gateway-core.
//!
//! Every test builds its own backends; nothing is shared between tests.

pub mod bulk;
pub mod helpers;
pub mod http;
pub mod identifier;
pub mod registry;
pub mod resolve;
