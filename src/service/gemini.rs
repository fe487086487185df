/// HTTP client for the Gemini image model and the Veo video model.
///
/// Built via [`GeminiClient::builder`], following the same builder shape
/// as our other HTTP clients.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::video::{Fetch, Operation, VideoRequest};
use super::{GenerationRequest, ImageGenerator, VideoJobService};
use crate::config::ApiConfig;
use crate::error::{StudioError, StudioResult};
use crate::imaging::media::DEFAULT_MIME;
use crate::imaging::ImageRecord;

const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn image(record: &ImageRecord) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: Some(record.mime_type.clone()),
                data: record.base64_payload.clone(),
            }),
        }
    }
}

impl GenerateContentBody {
    fn from_request(request: GenerationRequest) -> Self {
        let mut parts: Vec<Part> = request.images.iter().map(Part::image).collect();
        parts.push(Part::text(request.instruction));

        Self {
            system_instruction: request.system_instruction.map(|text| Content {
                role: None,
                parts: vec![Part::text(text)],
            }),
            contents: vec![Content {
                role: Some("user".into()),
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE", "TEXT"],
                image_config: ImageConfig {
                    aspect_ratio: request.aspect_ratio,
                },
            },
        }
    }
}

impl GenerateContentResponse {
    /// First inline image across all candidates
    fn into_first_image(self) -> Option<ImageRecord> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .map(|inline| ImageRecord {
                base64_payload: inline.data,
                mime_type: inline.mime_type.unwrap_or_else(|| DEFAULT_MIME.to_string()),
            })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    image_model: String,
    video_model: String,
}

impl ClientInner {
    /// Build the full URL for an API path.
    fn url(&self, path: &str) -> StudioResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| StudioError::Config(format!("bad API path '{path}': {e}")))
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> StudioResult<Value> {
        let resp = self
            .http
            .post(self.url(path)?)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    async fn get_json(&self, path: &str) -> StudioResult<Value> {
        let resp = self
            .http
            .get(self.url(path)?)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    /// Process an HTTP response, returning the JSON body or a service error.
    async fn handle_response(resp: reqwest::Response) -> StudioResult<Value> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json::<Value>().await?)
        } else {
            let message = resp.text().await.unwrap_or_default();
            Err(StudioError::Service(format!("{} {}", status.as_u16(), message)))
        }
    }
}

/// Client for the generative service
#[derive(Debug, Clone)]
pub struct GeminiClient {
    inner: Arc<ClientInner>,
}

impl GeminiClient {
    /// Start building a new client.
    pub fn builder(api_key: impl Into<String>) -> GeminiClientBuilder {
        let defaults = ApiConfig::default();
        GeminiClientBuilder {
            base_url: defaults.base_url,
            api_key: api_key.into(),
            image_model: defaults.image_model,
            video_model: defaults.video_model,
            timeout_secs: defaults.timeout_secs,
        }
    }

    /// Build from configuration. The API key must be present.
    pub fn from_config(config: &ApiConfig) -> StudioResult<Self> {
        let key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StudioError::Config("api.api_key is not set".into()))?;

        Self::builder(key)
            .base_url(&config.base_url)
            .image_model(&config.image_model)
            .video_model(&config.video_model)
            .timeout(config.timeout_secs)
            .build()
    }
}

/// Builder for [`GeminiClient`].
pub struct GeminiClientBuilder {
    base_url: String,
    api_key: String,
    image_model: String,
    video_model: String,
    timeout_secs: u64,
}

impl GeminiClientBuilder {
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn image_model(mut self, model: &str) -> Self {
        self.image_model = model.to_string();
        self
    }

    pub fn video_model(mut self, model: &str) -> Self {
        self.video_model = model.to_string();
        self
    }

    /// Set the request timeout in seconds (default: 120).
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> StudioResult<GeminiClient> {
        // `join` replaces the last segment unless the base ends with a slash
        let mut base = self.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url: Url = base
            .parse()
            .map_err(|e: url::ParseError| StudioError::Config(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        Ok(GeminiClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                api_key: self.api_key,
                image_model: self.image_model,
                video_model: self.video_model,
            }),
        })
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, request: GenerationRequest) -> StudioResult<ImageRecord> {
        let path = format!("v1beta/models/{}:generateContent", self.inner.image_model);
        tracing::debug!(images = request.images.len(), "requesting image generation");

        let body = GenerateContentBody::from_request(request);
        let value = self.inner.post_json(&path, &body).await?;
        let response: GenerateContentResponse = serde_json::from_value(value)?;

        response
            .into_first_image()
            .ok_or_else(|| StudioError::Service("no image generated in response".into()))
    }
}

#[async_trait]
impl VideoJobService for GeminiClient {
    async fn submit(&self, request: VideoRequest) -> StudioResult<Operation> {
        let path = format!("v1beta/models/{}:predictLongRunning", self.inner.video_model);
        let body = serde_json::json!({
            "instances": [{
                "prompt": request.prompt,
                "image": {
                    "bytesBase64Encoded": request.image.base64_payload,
                    "mimeType": request.image.mime_type,
                },
            }],
            "parameters": { "sampleCount": 1 },
        });

        let operation = Operation::from_json(self.inner.post_json(&path, &body).await?);
        if operation.name.is_empty() {
            return Err(StudioError::Service("video job submitted without an operation name".into()));
        }
        tracing::info!(operation = %operation.name, "video job submitted");
        Ok(operation)
    }

    async fn poll(&self, name: &str) -> StudioResult<Operation> {
        let value = self.inner.get_json(&format!("v1beta/{name}")).await?;
        Ok(Operation::from_json(value))
    }

    async fn fetch(&self, uri: &str, authenticated: bool) -> StudioResult<Fetch> {
        let mut url: Url = uri
            .parse()
            .map_err(|e| StudioError::Download(format!("bad video link {uri}: {e}")))?;
        if authenticated {
            url.query_pairs_mut().append_pair("key", &self.inner.api_key);
        }

        let resp = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| StudioError::Download(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Ok(Fetch::Rejected { status: status.as_u16() });
        }

        let mime_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("video/mp4")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StudioError::Download(e.to_string()))?
            .to_vec();

        Ok(Fetch::Body { bytes, mime_type })
    }
}
