use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::FuzzError;

/// The inference service behind its prompt/completion boundary. The engine
/// only ever sees validated JSON on the far side of this trait, so tests and
/// offline runs can substitute canned responses.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, FuzzError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatClient {
    pub fn new(api_base: &str, api_key: &str, model: &str, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiCompatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, FuzzError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .map_err(|e| FuzzError::Inference(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FuzzError::Inference(format!(
                "inference endpoint returned {}",
                status
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FuzzError::Inference(e.to_string()))?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FuzzError::Inference("empty completion".to_string()))
    }
}

/// System message for target selection and prerequisite analysis.
pub const SYSTEM_MESSAGE: &str =
    "You are a senior IoT fuzzing expert. Return ONLY the JSON object in the requested schema.";

/// Fills a target-selection prompt template. Templates use the
/// `{DATA_PACKET}`, `{cues}`, `{operation_type}`, `{function_category}`
/// substitution keys.
pub fn build_target_prompt(
    template: &str,
    data_packet: &str,
    cues: &[String],
    operation_type: &str,
    function_category: &str,
) -> String {
    template
        .replace("{DATA_PACKET}", data_packet)
        .replace("{cues}", &format!("{:?}", cues))
        .replace("{operation_type}", operation_type)
        .replace("{function_category}", function_category)
}

/// Fills a prerequisite-analysis prompt template for one target.
pub fn build_prerequisites_prompt(
    template: &str,
    data_packet: &str,
    target: &str,
    frontend_context: &str,
) -> String {
    template
        .replace("{DATA_PACKET}", data_packet)
        .replace("{TARGET}", target)
        .replace("{PREREQUISITES}", frontend_context)
}
