//! Integration tests for the SD WebUI MCP server.
//!
//! The upstream WebUI is mocked with wiremock and artifacts land in a
//! tempfile store root, so the full per-call flow is exercised: argument
//! defaulting, the upstream HTTP exchange, artifact substitution, and the
//! assembled tool result.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rmcp::model::{CallToolResult, RawContent};
use sdwebui_mcp_common::config::Config;
use sdwebui_mcp_common::storage::ArtifactStore;
use sdwebui_mcp_server::{SdWebuiHandler, SdWebuiServer, SwitchModelParams, Txt2ImgParams};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PUBLIC_URL: &str = "http://127.0.0.1:18080";

struct TestHarness {
    server: SdWebuiServer,
    store: Arc<ArtifactStore>,
    _image_dir: tempfile::TempDir,
}

fn harness(upstream_url: &str) -> TestHarness {
    let image_dir = tempfile::tempdir().unwrap();
    let config = Config {
        sdwebui_url: upstream_url.to_string(),
        image_dir: PathBuf::from(image_dir.path()),
        public_url: PUBLIC_URL.to_string(),
        port: 18080,
    };

    let store = Arc::new(ArtifactStore::new(
        config.image_dir.clone(),
        config.public_url.clone(),
    ));
    let handler = SdWebuiHandler::new(&config, store.clone()).unwrap();

    TestHarness {
        server: SdWebuiServer::new(handler),
        store,
        _image_dir: image_dir,
    }
}

fn texts(result: &CallToolResult) -> Vec<String> {
    result
        .content
        .iter()
        .map(|content| match &content.raw {
            RawContent::Text(text) => text.text.clone(),
            other => panic!("expected text content, got {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn txt2img_stores_artifacts_and_returns_references() {
    let upstream = MockServer::start().await;
    let image_bytes = b"\x89PNG fake image".to_vec();

    // Defaults must be filled before the request leaves the gateway.
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(body_partial_json(json!({
            "prompt": "a cat",
            "width": 512,
            "height": 512,
            "steps": 20,
            "sampler_name": "Euler a",
            "cfg_scale": 7.0,
            "batch_size": 1,
            "n_iter": 1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [BASE64.encode(&image_bytes)],
            "parameters": {"steps": 20, "width": 512},
            "info": "steps: 20"
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let params = Txt2ImgParams {
        prompt: "a cat".to_string(),
        ..Default::default()
    };

    let result = harness.server.txt2img(params).await;
    assert_eq!(result.is_error, Some(false));

    let texts = texts(&result);
    assert!(texts[0].contains('1'), "summary should carry a count: {}", texts[0]);
    assert!(texts.iter().any(|t| t.contains("steps: 20")), "info item expected");
    assert!(
        texts.iter().any(|t| t.contains("\"width\":512") || t.contains("\"width\": 512")),
        "parameters echo expected"
    );

    // Exactly one artifact reference, shaped {public}/read/file/{date}/{uuid}.png.
    let references: Vec<&String> = texts
        .iter()
        .filter(|t| t.starts_with(PUBLIC_URL))
        .collect();
    assert_eq!(references.len(), 1);
    let reference = references[0];
    assert!(reference.contains("/read/file/"));
    assert!(reference.ends_with(".png"));

    // The reference is the last content item and resolves to the exact bytes.
    assert_eq!(texts.last().unwrap(), reference);
    let relative = reference.split("/read/file/").nth(1).unwrap();
    let stored = harness.store.read(relative).await.unwrap();
    assert_eq!(stored, image_bytes);
}

#[tokio::test]
async fn txt2img_with_zero_images_is_an_error_result() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [],
            "info": ""
        })))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let params = Txt2ImgParams {
        prompt: "x".to_string(),
        ..Default::default()
    };

    let result = harness.server.txt2img(params).await;
    assert_eq!(result.is_error, Some(true));

    let texts = texts(&result);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("No image was produced"), "got: {}", texts[0]);
}

#[tokio::test]
async fn txt2img_surfaces_upstream_failure_with_status_and_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(500).set_body_string("cuda out of memory"))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let params = Txt2ImgParams {
        prompt: "a cat".to_string(),
        ..Default::default()
    };

    let result = harness.server.txt2img(params).await;
    assert_eq!(result.is_error, Some(true));

    let texts = texts(&result);
    assert!(texts[0].contains("500"));
    assert!(texts[0].contains("cuda out of memory"));
}

#[tokio::test]
async fn txt2img_rejects_empty_prompt_without_calling_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let params = Txt2ImgParams {
        prompt: "   ".to_string(),
        ..Default::default()
    };

    let result = harness.server.txt2img(params).await;
    assert_eq!(result.is_error, Some(true));
    assert!(texts(&result)[0].contains("prompt"));
}

#[tokio::test]
async fn txt2img_aborts_whole_call_on_malformed_image_payload() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": ["not!!valid@@base64"],
            "info": ""
        })))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let params = Txt2ImgParams {
        prompt: "a cat".to_string(),
        ..Default::default()
    };

    let result = harness.server.txt2img(params).await;
    assert_eq!(result.is_error, Some(true));
    assert!(texts(&result)[0].contains("Invalid base64"));
}

#[tokio::test]
async fn sd_models_returns_the_serialized_list() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sdapi/v1/sd-models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "title": "v1-5-pruned [6ce0161689]",
                "model_name": "v1-5-pruned",
                "hash": "6ce0161689",
                "filename": "/models/Stable-diffusion/v1-5-pruned.safetensors"
            },
            {
                "title": "dreamshaper_8 [879db523c3]",
                "model_name": "dreamshaper_8",
                "hash": "879db523c3",
                "filename": "/models/Stable-diffusion/dreamshaper_8.safetensors"
            }
        ])))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let result = harness.server.sd_models().await;
    assert_eq!(result.is_error, Some(false));

    let texts = texts(&result);
    assert_eq!(texts.len(), 1);

    let models: Value = serde_json::from_str(&texts[0]).unwrap();
    let models = models.as_array().unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0]["model_name"], "v1-5-pruned");
    assert_eq!(models[1]["hash"], "879db523c3");
}

#[tokio::test]
async fn sd_models_surfaces_upstream_failure() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sdapi/v1/sd-models"))
        .respond_with(ResponseTemplate::new(503).set_body_string("starting up"))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let result = harness.server.sd_models().await;
    assert_eq!(result.is_error, Some(true));
    assert!(texts(&result)[0].contains("503"));
}

#[tokio::test]
async fn switch_model_success_yields_fixed_confirmation() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/options"))
        .and(body_partial_json(json!({"sd_model_checkpoint": "modelA"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let result = harness
        .server
        .switch_model(SwitchModelParams {
            sd_model_checkpoint: "modelA".to_string(),
        })
        .await;

    assert_eq!(result.is_error, Some(false));
    let texts = texts(&result);
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0], "Model switched successfully");
}

#[tokio::test]
async fn switch_model_failure_carries_upstream_detail() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/options"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown checkpoint"))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());
    let result = harness
        .server
        .switch_model(SwitchModelParams {
            sd_model_checkpoint: "nope".to_string(),
        })
        .await;

    assert_eq!(result.is_error, Some(true));
    let texts = texts(&result);
    assert!(texts[0].contains("422"));
    assert!(texts[0].contains("unknown checkpoint"));
}

#[tokio::test]
async fn a_failed_call_leaves_the_gateway_serving_the_next_one() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdapi/v1/sd-models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&upstream)
        .await;

    let harness = harness(&upstream.uri());

    let failed = harness
        .server
        .txt2img(Txt2ImgParams {
            prompt: "a cat".to_string(),
            ..Default::default()
        })
        .await;
    assert_eq!(failed.is_error, Some(true));

    let healthy = harness.server.sd_models().await;
    assert_eq!(healthy.is_error, Some(false));
}
