use crate::http::build_client;
use crate::llm::{Credential, GenerationRequest, GenerationService, InlineImage, LlmError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
        }
    }
}

pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<String, LlmError> {
        let base = self.config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(LlmError::Http("missing base url".into()));
        }

        let mut parts: Vec<Part> = request
            .parts
            .iter()
            .map(|text| Part::Text { text: text.clone() })
            .collect();
        if let Some(image) = &request.image {
            parts.push(Part::InlineData {
                inline_data: image.clone(),
            });
        }

        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_mime_type: "text/plain",
            },
        };

        let url = format!("{base}/v1beta/models/{}:generateContent", request.model);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &detail));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))?;

        Ok(text)
    }
}

fn classify_failure(status: StatusCode, detail: &str) -> LlmError {
    let summary: String = detail.chars().take(200).collect();
    let lowered = detail.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS
        || lowered.contains("resource_exhausted")
        || lowered.contains("quota")
    {
        LlmError::RateLimited(format!("HTTP {status}: {summary}"))
    } else if status == StatusCode::NOT_FOUND || lowered.contains("not found") {
        LlmError::ModelNotFound(format!("HTTP {status}: {summary}"))
    } else {
        LlmError::Http(format!("HTTP {status}: {summary}"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineImage },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            base_url: server.uri(),
        })
    }

    fn key() -> Credential {
        Credential::new("test-key").unwrap()
    }

    #[tokio::test]
    async fn returns_joined_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "hello "}, {"text": "world"}]}}]
            })))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&key(), &GenerationRequest::text("gemini-2.0-flash", "hi"))
            .await
            .expect("generate");
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&key(), &GenerationRequest::text("m", "hi"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, LlmError::RateLimited(_)));
    }

    #[tokio::test]
    async fn maps_404_to_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("models/x is not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&key(), &GenerationRequest::text("x", "hi"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, LlmError::ModelNotFound(_)));
    }

    #[test]
    fn server_errors_stay_generic() {
        let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, LlmError::Http(_)));
    }
}
