//! MCP server implementation for the SD WebUI gateway.
//!
//! Exposes three tools:
//! - `txt2img` for text-to-image generation
//! - `sd_models` for listing available checkpoints
//! - `switch_model` for switching the active checkpoint
//!
//! Every tool handler runs inside a failure-isolation boundary: a panic in
//! one call is logged and converted into an error-flagged result, leaving
//! the dispatcher and all other in-flight calls untouched.

use crate::content::{ContentItem, ToolResult};
use crate::handler::{SdWebuiHandler, SwitchModelParams, Txt2ImgParams};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{CallToolResult, ServerCapabilities, ServerInfo},
};
use schemars::JsonSchema;
use serde_json::Value;
use std::any::Any;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// MCP server for Stable Diffusion WebUI.
#[derive(Clone)]
pub struct SdWebuiServer {
    /// Upstream client shared by all tool calls
    handler: Arc<SdWebuiHandler>,
}

impl SdWebuiServer {
    /// Create a new server around an upstream handler.
    pub fn new(handler: SdWebuiHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Generate images from a text prompt.
    pub async fn txt2img(&self, params: Txt2ImgParams) -> CallToolResult {
        info!(prompt = %params.prompt, "Generating image");
        let handler = self.handler.clone();
        run_isolated("txt2img", async move { txt2img_result(handler, params).await })
            .await
            .into_call_tool_result()
    }

    /// List the checkpoints available upstream.
    pub async fn sd_models(&self) -> CallToolResult {
        let handler = self.handler.clone();
        run_isolated("sd_models", async move { sd_models_result(handler).await })
            .await
            .into_call_tool_result()
    }

    /// Switch the active checkpoint.
    pub async fn switch_model(&self, params: SwitchModelParams) -> CallToolResult {
        info!(model = %params.sd_model_checkpoint, "Switching model");
        let handler = self.handler.clone();
        run_isolated("switch_model", async move {
            switch_model_result(handler, params).await
        })
        .await
        .into_call_tool_result()
    }
}

/// Assemble the txt2img tool result.
async fn txt2img_result(handler: Arc<SdWebuiHandler>, params: Txt2ImgParams) -> ToolResult {
    let response = match handler.text_to_image(params).await {
        Ok(response) => response,
        Err(err) => return ToolResult::error(format!("Image generation failed: {err}")),
    };

    if response.images.is_empty() {
        return ToolResult::error("No image was produced by the upstream service");
    }

    let mut content = vec![ContentItem::text(format!(
        "Generated {} image(s)",
        response.images.len()
    ))];

    if let Some(parameters) = &response.parameters {
        if let Ok(json) = serde_json::to_string(parameters) {
            content.push(ContentItem::text(format!("Generation parameters: {json}")));
        }
    }

    if !response.info.is_empty() {
        content.push(ContentItem::text(format!("Generation info: {}", response.info)));
    }

    for reference in &response.images {
        content.push(ContentItem::text(reference));
    }

    ToolResult::success(content)
}

/// Assemble the sd_models tool result.
async fn sd_models_result(handler: Arc<SdWebuiHandler>) -> ToolResult {
    let models = match handler.sd_models().await {
        Ok(models) => models,
        Err(err) => return ToolResult::error(format!("Failed to list models: {err}")),
    };

    match serde_json::to_string(&models) {
        Ok(json) => ToolResult::success(vec![ContentItem::text(json)]),
        Err(err) => ToolResult::error(format!("Failed to list models: {err}")),
    }
}

/// Assemble the switch_model tool result.
async fn switch_model_result(handler: Arc<SdWebuiHandler>, params: SwitchModelParams) -> ToolResult {
    match handler.switch_model(params).await {
        Ok(outcome) if outcome.success => {
            ToolResult::success(vec![ContentItem::text(outcome.message)])
        }
        Ok(outcome) => ToolResult::error(outcome.message),
        Err(err) => ToolResult::error(format!("Failed to switch model: {err}")),
    }
}

/// Run a tool handler on its own task so a fault stays contained to that
/// call.
///
/// A panic inside the future is logged with the tool name (the process
/// panic hook has already recorded the backtrace) and downgraded to an
/// error-flagged result. No mutable state crosses this boundary.
async fn run_isolated<F>(tool: &str, fut: F) -> ToolResult
where
    F: Future<Output = ToolResult> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let reason = panic_reason(err.into_panic());
            error!(tool, reason = %reason, "Tool handler panicked");
            ToolResult::error(format!(
                "Tool {tool} failed with an internal error: {reason}. See the server log for details."
            ))
        }
        Err(err) => {
            error!(tool, error = %err, "Tool task aborted");
            ToolResult::error(format!("Tool {tool} was cancelled before completing"))
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// JSON schema for a tool's input parameters.
fn input_schema<T: JsonSchema>() -> Arc<serde_json::Map<String, Value>> {
    let schema = schemars::schema_for!(T);
    let schema_value = serde_json::to_value(&schema).unwrap_or_default();
    match schema_value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

/// Schema for tools taking no parameters.
fn empty_input_schema() -> Arc<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    map.insert("type".to_string(), Value::String("object".to_string()));
    Arc::new(map)
}

/// Decode tool arguments into the handler's expected shape.
fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Option<serde_json::Map<String, Value>>,
) -> Result<T, McpError> {
    arguments
        .map(|args| serde_json::from_value(Value::Object(args)))
        .transpose()
        .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {e}"), None))?
        .ok_or_else(|| McpError::invalid_params("Missing parameters", None))
}

impl ServerHandler for SdWebuiServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Stable Diffusion WebUI MCP server. \
                 Use txt2img to generate images from a text prompt, \
                 sd_models to list available checkpoints, \
                 and switch_model to change the active checkpoint. \
                 Generated images are returned as URLs served by this process."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _params: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<rmcp::model::ListToolsResult, McpError>> + Send + '_
    {
        async move {
            use rmcp::model::{ListToolsResult, Tool};

            Ok(ListToolsResult {
                tools: vec![
                    Tool {
                        name: Cow::Borrowed("txt2img"),
                        description: Some(Cow::Borrowed(
                            "Generate images from a text prompt using the Stable Diffusion \
                             WebUI txt2img API. Returns a generation summary and one URL per \
                             stored image.",
                        )),
                        input_schema: input_schema::<Txt2ImgParams>(),
                        annotations: None,
                        icons: None,
                        meta: None,
                        output_schema: None,
                        title: None,
                    },
                    Tool {
                        name: Cow::Borrowed("sd_models"),
                        description: Some(Cow::Borrowed(
                            "List the Stable Diffusion checkpoints available on the upstream \
                             WebUI as a JSON array.",
                        )),
                        input_schema: empty_input_schema(),
                        annotations: None,
                        icons: None,
                        meta: None,
                        output_schema: None,
                        title: None,
                    },
                    Tool {
                        name: Cow::Borrowed("switch_model"),
                        description: Some(Cow::Borrowed(
                            "Switch the active Stable Diffusion checkpoint on the upstream \
                             WebUI.",
                        )),
                        input_schema: input_schema::<SwitchModelParams>(),
                        annotations: None,
                        icons: None,
                        meta: None,
                        output_schema: None,
                        title: None,
                    },
                ],
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: rmcp::model::CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            match params.name.as_ref() {
                "txt2img" => {
                    let tool_params: Txt2ImgParams = parse_args(params.arguments)?;
                    Ok(self.txt2img(tool_params).await)
                }
                "sd_models" => Ok(self.sd_models().await),
                "switch_model" => {
                    let tool_params: SwitchModelParams = parse_args(params.arguments)?;
                    Ok(self.switch_model(tool_params).await)
                }
                _ => Err(McpError::invalid_params(
                    format!("Unknown tool: {}", params.name),
                    None,
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn isolation_converts_a_panic_into_an_error_result() {
        let result = run_isolated("txt2img", async { panic!("handler bug") }).await;

        assert!(result.is_error);
        assert_eq!(result.content.len(), 1);
        match &result.content[0] {
            ContentItem::Text { text } => {
                assert!(text.contains("txt2img"));
                assert!(text.contains("handler bug"));
            }
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn isolation_leaves_subsequent_calls_working() {
        let faulty = run_isolated("txt2img", async { panic!("boom") }).await;
        assert!(faulty.is_error);

        let healthy = run_isolated("sd_models", async {
            ToolResult::success(vec![ContentItem::text("[]")])
        })
        .await;
        assert!(!healthy.is_error);
        assert_eq!(healthy.content, vec![ContentItem::text("[]")]);
    }

    #[tokio::test]
    async fn concurrent_calls_do_not_share_a_fault() {
        let faulty = tokio::spawn(run_isolated("txt2img", async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            panic!("slow fault")
        }));
        let healthy = tokio::spawn(run_isolated("sd_models", async {
            ToolResult::success(vec![ContentItem::text("ok")])
        }));

        assert!(!healthy.await.unwrap().is_error);
        assert!(faulty.await.unwrap().is_error);
    }

    #[test]
    fn panic_reason_handles_common_payload_shapes() {
        assert_eq!(panic_reason(Box::new("static message")), "static message");
        assert_eq!(
            panic_reason(Box::new("owned message".to_string())),
            "owned message"
        );
        assert_eq!(panic_reason(Box::new(42u64)), "unknown panic");
    }

    #[test]
    fn server_info_advertises_tools() {
        let info = ServerInfo {
            instructions: Some("test".to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        };
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn txt2img_schema_lists_request_fields() {
        let schema = input_schema::<Txt2ImgParams>();
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .expect("schema should have properties");

        for field in ["prompt", "width", "height", "steps", "sampler_name", "cfg_scale"] {
            assert!(properties.contains_key(field), "missing field {field}");
        }
    }

    #[test]
    fn switch_model_schema_requires_checkpoint_name() {
        let schema = input_schema::<SwitchModelParams>();
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .expect("schema should have required fields");
        assert!(required.contains(&Value::String("sd_model_checkpoint".to_string())));
    }

    #[test]
    fn empty_schema_is_an_object() {
        let schema = empty_input_schema();
        assert_eq!(schema.get("type"), Some(&Value::String("object".to_string())));
    }

    #[test]
    fn parse_args_rejects_missing_parameters() {
        let result: Result<Txt2ImgParams, McpError> = parse_args(None);
        assert!(result.is_err());
    }

    #[test]
    fn parse_args_rejects_malformed_parameters() {
        let mut args = serde_json::Map::new();
        args.insert("prompt".to_string(), Value::from(12));
        let result: Result<Txt2ImgParams, McpError> = parse_args(Some(args));
        assert!(result.is_err());
    }

    #[test]
    fn parse_args_decodes_valid_parameters() {
        let mut args = serde_json::Map::new();
        args.insert("prompt".to_string(), Value::from("a cat"));
        args.insert("steps".to_string(), Value::from(30));
        let params: Txt2ImgParams = parse_args(Some(args)).unwrap();
        assert_eq!(params.prompt, "a cat");
        assert_eq!(params.steps, Some(30));
    }
}
