//! # cjbox-server
//!
//! HTTP and WebSocket front end for the cjbox playground.
//!
//! One-shot `run`/`format` requests and interactive language server sessions
//! are handed to a shared [`cjbox_core::Playground`]; this crate only owns the
//! transport, the request-level error mapping and the environment configuration.

pub mod config;
pub mod error;
pub mod http;

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
