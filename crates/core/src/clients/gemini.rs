use crate::error::ModelError;
use crate::traits::{TextEmbedder, TextGenerator};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative Language REST client. Model ids are passed per call; a
/// leading `models/` is accepted and stripped.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_API_BASE, api_key)
    }

    pub fn with_base_url(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn model_url(&self, model_id: &str, action: &str) -> String {
        let model = model_id.trim_start_matches("models/");
        format!("{}/models/{model}:{action}", self.api_base)
    }

    async fn post(&self, url: &str, body: Value) -> Result<Value, ModelError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        response
            .json::<Value>()
            .await
            .map_err(|error| ModelError::InvalidResponse(error.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ModelError::Timeout,
        _ => ModelError::Unknown(format!("{status}: {body}")),
    })
}

fn generated_text(parsed: &Value) -> Result<String, ModelError> {
    let parts = parsed
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| ModelError::InvalidResponse("response has no candidate parts".to_string()))?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(ModelError::InvalidResponse("candidate text is empty".to_string()));
    }
    Ok(text)
}

fn embedding_values(parsed: &Value) -> Result<Vec<f32>, ModelError> {
    let values = parsed
        .pointer("/embedding/values")
        .and_then(Value::as_array)
        .ok_or_else(|| ModelError::InvalidResponse("response has no embedding".to_string()))?;

    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| ModelError::InvalidResponse("embedding value is not a number".to_string()))
        })
        .collect()
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(
        &self,
        prompt: &str,
        model_id: &str,
        max_tokens: u32,
    ) -> Result<String, ModelError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "maxOutputTokens": max_tokens },
        });
        let parsed = self.post(&self.model_url(model_id, "generateContent"), body).await?;
        generated_text(&parsed)
    }
}

#[async_trait]
impl TextEmbedder for GeminiClient {
    async fn embed_text(&self, text: &str, model_id: &str) -> Result<Vec<f32>, ModelError> {
        let model = model_id.trim_start_matches("models/");
        let body = json!({
            "model": format!("models/{model}"),
            "content": { "parts": [{ "text": text }] },
        });
        let parsed = self.post(&self.model_url(model_id, "embedContent"), body).await?;
        embedding_values(&parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generation_joins_candidate_parts() -> Result<(), ModelError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "key"))
            .and(body_partial_json(json!({ "generationConfig": { "maxOutputTokens": 64 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Hello, " }, { "text": "world." }] } }]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(server.uri(), "key");
        let text = client
            .generate_text("say hi", "models/gemini-1.5-flash", 64)
            .await?;
        assert_eq!(text, "Hello, world.");
        Ok(())
    }

    #[tokio::test]
    async fn embedding_values_are_read() -> Result<(), ModelError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/embedding-001:embedContent"))
            .and(body_partial_json(json!({ "model": "models/embedding-001" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embedding": { "values": [0.25, -0.5, 1.0] }
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(server.uri(), "key");
        let vector = client.embed_text("fn main() {}", "models/embedding-001").await?;
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
        Ok(())
    }

    #[tokio::test]
    async fn error_kinds_are_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/limited:generateContent"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/slow:generateContent"))
            .respond_with(ResponseTemplate::new(504))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/empty:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/broken:generateContent"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(server.uri(), "key");
        let limited = client.generate_text("p", "limited", 8).await;
        let slow = client.generate_text("p", "slow", 8).await;
        let empty = client.generate_text("p", "empty", 8).await;
        let broken = client.generate_text("p", "broken", 8).await;

        assert_eq!(limited, Err(ModelError::RateLimited));
        assert_eq!(slow, Err(ModelError::Timeout));
        assert!(matches!(empty, Err(ModelError::InvalidResponse(_))));
        assert!(matches!(broken, Err(ModelError::Unknown(_))));
    }
}
