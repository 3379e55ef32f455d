//! Stable Diffusion WebUI MCP Common Library
//!
//! Shared utilities for configuration, artifact storage, error handling,
//! server/transport plumbing, and tracing used by the SD WebUI MCP server.

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod tracing;
pub mod transport;


pub use config::Config;
pub use error::{ConfigError, Error, Result, StorageError};
pub use server::{FileRoutes, McpServerBuilder, ServerError, shutdown_channel};
pub use storage::ArtifactStore;
pub use transport::{Transport, TransportArgs, TransportMode};
