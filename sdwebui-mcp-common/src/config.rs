//! Configuration module for loading environment variables and settings.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Default Stable Diffusion WebUI API address.
pub const DEFAULT_SDWEBUI_URL: &str = "http://127.0.0.1:7860";
/// Default directory for stored artifacts.
pub const DEFAULT_IMAGE_DIR: &str = "./images";
/// Default externally visible server address.
pub const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:18080";
/// Default HTTP server port.
pub const DEFAULT_PORT: u16 = 18080;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Stable Diffusion WebUI API
    pub sdwebui_url: String,
    /// Directory where generated images are stored
    pub image_dir: PathBuf,
    /// Externally visible base URL used to build artifact links
    pub public_url: String,
    /// HTTP server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// Every variable is optional; documented defaults apply when unset.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if PORT is set but not a valid
    /// port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let sdwebui_url = std::env::var("SDWEBUI_URL")
            .map(|url| trim_trailing_slash(&url))
            .unwrap_or_else(|_| DEFAULT_SDWEBUI_URL.to_string());

        let image_dir = std::env::var("IMAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_IMAGE_DIR));

        let public_url = std::env::var("PUBLIC_URL")
            .map(|url| trim_trailing_slash(&url))
            .unwrap_or_else(|_| DEFAULT_PUBLIC_URL.to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| {
                ConfigError::invalid_value("PORT", format!("not a valid port number: {raw}"))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            sdwebui_url,
            image_dir,
            public_url,
            port,
        })
    }
}

/// Artifact links are built by joining paths onto the URL, so a trailing
/// separator would produce double slashes.
fn trim_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
