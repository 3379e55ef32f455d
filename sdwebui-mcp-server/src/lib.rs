//! Stable Diffusion WebUI MCP Server Library
//!
//! Exposes a Stable Diffusion WebUI instance through MCP tools and serves
//! the generated images back over a restricted read path.

pub mod content;
pub mod handler;
pub mod server;

pub use content::{ContentItem, ToolResult};
pub use handler::{
    SdModel, SdWebuiHandler, SwitchModelOutcome, SwitchModelParams, Txt2ImgParams, Txt2ImgResponse,
};
pub use server::SdWebuiServer;
