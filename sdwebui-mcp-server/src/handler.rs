//! Upstream client for the Stable Diffusion WebUI API.
//!
//! `SdWebuiHandler` forwards three operations to the WebUI HTTP API:
//! text-to-image generation, checkpoint listing, and checkpoint switching.
//! Generated images never leave this module as raw payloads; every base64
//! image in an upstream response is pushed through the artifact store and
//! replaced by its stored reference.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use schemars::JsonSchema;
use sdwebui_mcp_common::config::Config;
use sdwebui_mcp_common::error::Error;
use sdwebui_mcp_common::storage::ArtifactStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default image width in pixels.
pub const DEFAULT_WIDTH: u32 = 512;
/// Default image height in pixels.
pub const DEFAULT_HEIGHT: u32 = 512;
/// Default sampling step count.
pub const DEFAULT_STEPS: u32 = 20;
/// Default sampler.
pub const DEFAULT_SAMPLER: &str = "Euler a";
/// Default classifier-free guidance scale.
pub const DEFAULT_CFG_SCALE: f64 = 7.0;
/// Default batch size.
pub const DEFAULT_BATCH_SIZE: u32 = 1;
/// Default iteration count.
pub const DEFAULT_N_ITER: u32 = 1;

/// Request timeout. Generation can take minutes on a busy GPU.
pub const GENERATION_TIMEOUT_SECS: u64 = 300;

/// Fixed confirmation message for a successful checkpoint switch; the
/// upstream options endpoint returns no structured confirmation.
pub const SWITCH_MODEL_SUCCESS_MESSAGE: &str = "Model switched successfully";

/// Text-to-image generation parameters.
///
/// Unset (or zero) numeric fields are replaced with their documented
/// defaults by [`Txt2ImgParams::fill_defaults`] before the request is sent
/// upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Txt2ImgParams {
    /// Text prompt describing the image to generate
    pub prompt: String,

    /// Negative prompt - what to avoid in the generated image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    /// Image width in pixels (default: 512)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    /// Image height in pixels (default: 512)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Number of sampling steps (default: 20)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,

    /// Sampler to use (default: "Euler a")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler_name: Option<String>,

    /// Random seed; -1 lets the upstream pick one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// Classifier-free guidance scale (default: 7.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,

    /// Number of images per batch (default: 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    /// Number of batches to run (default: 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_iter: Option<u32>,

    /// Enable the high-resolution fix pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_hr: Option<bool>,

    /// Upscale factor for the high-resolution pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_scale: Option<f64>,

    /// Sampler for the high-resolution pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_sampler_name: Option<String>,

    /// Step count for the high-resolution pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_steps: Option<u32>,

    /// Denoising strength for the high-resolution pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_denoising_strength: Option<f64>,

    /// Upscaler algorithm for the high-resolution pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_upscaler: Option<String>,

    /// Enable face restoration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_faces: Option<bool>,

    /// Generate a tileable image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiling: Option<bool>,

    /// Free-form overrides applied to upstream settings for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_settings: Option<serde_json::Map<String, Value>>,

    /// Arguments for the selected script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_args: Option<Vec<Value>>,

    /// Name of a WebUI script to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,

    /// Enable the ControlNet extension for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlnet_enabled: Option<bool>,

    /// ControlNet configuration units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlnet_units: Option<Vec<ControlNetUnit>>,
}

/// A single ControlNet conditioning unit, passed through to the upstream
/// extension untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ControlNetUnit {
    /// Conditioning image (base64 or URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image: Option<String>,

    /// Optional mask image (base64 or URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,

    /// Preprocessor module, e.g. canny, depth, softedge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// ControlNet model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Conditioning weight (0-2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// How the input image is fitted to the target size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize_mode: Option<String>,

    /// Enable low-VRAM mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lowvram: Option<bool>,

    /// Preprocessor resolution in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_res: Option<u32>,

    /// Module-specific threshold A
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_a: Option<f64>,

    /// Module-specific threshold B
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_b: Option<f64>,

    /// Guidance strength
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f64>,

    /// Guidance start ratio (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_start: Option<f64>,

    /// Guidance end ratio (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_end: Option<f64>,

    /// Relative importance of prompt and ControlNet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_mode: Option<String>,

    /// Preserve input edges and structure as closely as possible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_perfect: Option<bool>,

    /// Multiple conditioning images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_images: Option<Vec<String>>,
}

/// Validation error details for tool parameters.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Txt2ImgParams {
    /// Validate the parameters.
    ///
    /// # Returns
    /// - `Ok(())` if all parameters are valid
    /// - `Err(Vec<ValidationError>)` with all validation errors
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.prompt.trim().is_empty() {
            errors.push(ValidationError {
                field: "prompt".to_string(),
                message: "Prompt cannot be empty".to_string(),
            });
        }

        if let Some(cfg_scale) = self.cfg_scale {
            if cfg_scale < 0.0 {
                errors.push(ValidationError {
                    field: "cfg_scale".to_string(),
                    message: format!("cfg_scale must not be negative, got {}", cfg_scale),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Replace unset or zero fields with their documented defaults.
    ///
    /// Applying this twice yields the same request as applying it once.
    pub fn fill_defaults(&mut self) {
        fill_count(&mut self.width, DEFAULT_WIDTH);
        fill_count(&mut self.height, DEFAULT_HEIGHT);
        fill_count(&mut self.steps, DEFAULT_STEPS);
        fill_count(&mut self.batch_size, DEFAULT_BATCH_SIZE);
        fill_count(&mut self.n_iter, DEFAULT_N_ITER);

        if self.sampler_name.as_deref().is_none_or(str::is_empty) {
            self.sampler_name = Some(DEFAULT_SAMPLER.to_string());
        }
        if self.cfg_scale.is_none_or(|v| v == 0.0) {
            self.cfg_scale = Some(DEFAULT_CFG_SCALE);
        }
    }
}

fn fill_count(field: &mut Option<u32>, default: u32) {
    if field.is_none_or(|v| v == 0) {
        *field = Some(default);
    }
}

/// Text-to-image response.
///
/// Constructed from the upstream payload; `images` is mutated in place from
/// raw base64 data to stored artifact references before the response is
/// handed to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txt2ImgResponse {
    /// Artifact references for the generated images
    #[serde(default)]
    pub images: Vec<String>,

    /// Generation parameters echoed by the upstream
    #[serde(default)]
    pub parameters: Option<serde_json::Map<String, Value>>,

    /// Free-text generation info
    #[serde(default)]
    pub info: String,
}

/// A Stable Diffusion checkpoint known to the upstream WebUI.
///
/// Read-only mirror of upstream state; never cached beyond one call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SdModel {
    /// Display title, usually "name [hash]"
    pub title: String,

    /// Internal model name
    pub model_name: String,

    /// Short model hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Checkpoint file name on the upstream host
    #[serde(default)]
    pub filename: String,

    /// Associated config file, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Checkpoint size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    /// Whether this checkpoint is currently active
    #[serde(default)]
    pub active: bool,

    /// Optional model description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Checkpoint switch parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwitchModelParams {
    /// Name of the checkpoint to activate
    pub sd_model_checkpoint: String,
}

/// Outcome of a checkpoint switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchModelOutcome {
    /// Whether the switch succeeded
    pub success: bool,
    /// Human-readable outcome message
    pub message: String,
}

/// Stateless client for the Stable Diffusion WebUI API.
pub struct SdWebuiHandler {
    base_url: String,
    store: Arc<ArtifactStore>,
    http: reqwest::Client,
}

impl SdWebuiHandler {
    /// Create a new handler for the configured upstream.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config, store: Arc<ArtifactStore>) -> Result<Self, Error> {
        let base_url = config.sdwebui_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::api(&base_url, 0, format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            store,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Generate images from a text prompt.
    ///
    /// Defaults are filled before the request is sent. Every image in the
    /// upstream response is persisted through the artifact store and
    /// replaced by its reference; a single decode or write failure aborts
    /// the whole call so no partial reference list is returned.
    ///
    /// # Errors
    /// Returns `Error::Validation` for invalid parameters, `Error::Api` for
    /// upstream failures, `Error::Storage` for artifact write failures.
    #[instrument(level = "info", name = "txt2img", skip(self, params), fields(prompt_len = params.prompt.len()))]
    pub async fn text_to_image(&self, mut params: Txt2ImgParams) -> Result<Txt2ImgResponse, Error> {
        params.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            Error::validation(messages.join("; "))
        })?;
        params.fill_defaults();

        let endpoint = self.endpoint("/sdapi/v1/txt2img");
        debug!(endpoint = %endpoint, "Calling txt2img API");

        let response = self
            .http
            .post(&endpoint)
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        let mut payload: Txt2ImgResponse = response.json().await.map_err(|e| {
            Error::api(&endpoint, status.as_u16(), format!("Failed to parse response: {e}"))
        })?;

        // Substitute stored references for raw payloads; the response never
        // leaves this client carrying image bytes.
        let mut references = Vec::with_capacity(payload.images.len());
        for image in &payload.images {
            let bytes = BASE64.decode(image.as_bytes()).map_err(|e| {
                Error::api(
                    &endpoint,
                    status.as_u16(),
                    format!("Invalid base64 image in response: {e}"),
                )
            })?;
            references.push(self.store.save(&bytes).await?);
        }
        payload.images = references;

        info!(count = payload.images.len(), "Stored generated images");
        Ok(payload)
    }

    /// List the checkpoints available on the upstream WebUI.
    ///
    /// # Errors
    /// Returns `Error::Api` if the upstream call fails.
    pub async fn sd_models(&self) -> Result<Vec<SdModel>, Error> {
        let endpoint = self.endpoint("/sdapi/v1/sd-models");
        debug!(endpoint = %endpoint, "Listing models");

        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        let models: Vec<SdModel> = response.json().await.map_err(|e| {
            Error::api(&endpoint, status.as_u16(), format!("Failed to parse response: {e}"))
        })?;

        Ok(models)
    }

    /// Switch the active checkpoint.
    ///
    /// Success is determined solely by the HTTP status; the upstream
    /// options endpoint returns no structured confirmation.
    ///
    /// # Errors
    /// Returns `Error::Api` if the upstream call fails.
    #[instrument(level = "info", name = "switch_model", skip(self), fields(model = %params.sd_model_checkpoint))]
    pub async fn switch_model(
        &self,
        params: SwitchModelParams,
    ) -> Result<SwitchModelOutcome, Error> {
        let endpoint = self.endpoint("/sdapi/v1/options");

        let response = self
            .http
            .post(&endpoint)
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        Ok(SwitchModelOutcome {
            success: true,
            message: SWITCH_MODEL_SUCCESS_MESSAGE.to_string(),
        })
    }
}
