use std::time::Duration;

use serde::{Deserialize, Serialize};
use trading_core_types::CoreError;

/// Token usage reported by a provider call, used by the cost tracker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Usage,
}

/// The two wire-compatible LLM providers the gateway talks to, mirroring the
/// reference crate's `AiProvider` one-for-one: an Anthropic-shaped chat
/// endpoint used for "deep thinking" calls, and an OpenAI/Zhipu-shaped one.
#[derive(Debug, Clone)]
pub enum AiProvider {
    Anthropic { api_key: String, model: String },
    Zai { api_key: String, model: String, endpoint: String },
}

impl AiProvider {
    pub fn model(&self) -> &str {
        match self {
            AiProvider::Anthropic { model, .. } => model,
            AiProvider::Zai { model, .. } => model,
        }
    }

    pub fn provider_id(&self) -> &str {
        match self {
            AiProvider::Anthropic { .. } => "anthropic",
            AiProvider::Zai { .. } => "zai-coding-plan",
        }
    }

    pub async fn call(
        &self,
        client: &reqwest::Client,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ProviderResponse, CoreError> {
        match self {
            AiProvider::Anthropic { api_key, model } => {
                call_anthropic(client, prompt, system_prompt, temperature, max_tokens, api_key, model)
                    .await
            }
            AiProvider::Zai {
                api_key,
                model,
                endpoint,
            } => call_zai(client, prompt, system_prompt, temperature, max_tokens, api_key, model, endpoint).await,
        }
    }
}

const DEEP_THINKING_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

async fn call_anthropic(
    client: &reqwest::Client,
    prompt: &str,
    system_prompt: Option<&str>,
    temperature: f64,
    max_tokens: u32,
    api_key: &str,
    model: &str,
) -> Result<ProviderResponse, CoreError> {
    let mut messages = Vec::new();
    if let Some(system) = system_prompt {
        messages.push(serde_json::json!({"role": "user", "content": system}));
        messages.push(serde_json::json!({"role": "assistant", "content": "Understood."}));
    }
    messages.push(serde_json::json!({"role": "user", "content": prompt}));

    let response = client
        .post("https://api.anthropic.com/v1/messages")
        .timeout(DEEP_THINKING_TIMEOUT)
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "top_p": 0.95,
            "top_k": 40,
            "messages": messages,
        }))
        .send()
        .await?;

    if response.status().as_u16() == 429 {
        return Err(CoreError::LlmRateLimited);
    }
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::LlmProviderError(format!("anthropic {status}: {body}")));
    }

    let body: serde_json::Value = response.json().await?;
    let text = body["content"][0]["text"].as_str().unwrap_or_default().to_string();
    let usage = Usage {
        prompt_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        completion_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        cache_read_tokens: body["usage"]["cache_read_input_tokens"].as_u64().unwrap_or(0),
        cache_write_tokens: body["usage"]["cache_creation_input_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ProviderResponse { text, usage })
}

async fn call_zai(
    client: &reqwest::Client,
    prompt: &str,
    system_prompt: Option<&str>,
    temperature: f64,
    max_tokens: u32,
    api_key: &str,
    model: &str,
    endpoint: &str,
) -> Result<ProviderResponse, CoreError> {
    let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));

    let mut messages = Vec::new();
    if let Some(system) = system_prompt {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    messages.push(serde_json::json!({"role": "user", "content": prompt}));

    let response = client
        .post(&url)
        .timeout(DEFAULT_TIMEOUT)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": messages,
        }))
        .send()
        .await?;

    if response.status().as_u16() == 429 {
        return Err(CoreError::LlmRateLimited);
    }
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::LlmProviderError(format!("zai {status}: {body}")));
    }

    let body: serde_json::Value = response.json().await?;
    let message = &body["choices"][0]["message"];
    let text = message["content"].as_str().unwrap_or_default().to_string();
    let usage = Usage {
        prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        cache_read_tokens: 0,
        cache_write_tokens: 0,
    };

    Ok(ProviderResponse { text, usage })
}

/// Extracts a JSON object from free-form model text. Tries a ```json fence,
/// then a bare ``` fence, then scans for the first `{` whose matching `}` is
/// found by tracking brace depth with string/escape awareness (so braces
/// inside quoted strings never throw off the count).
pub fn extract_json(s: &str) -> &str {
    if let Some(start) = s.find("```json") {
        let after = &s[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = s.find("```") {
        let after = &s[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = s.find('{') {
        if let Some(end) = find_matching_brace(s, start) {
            return &s[start..=end];
        }
    }
    s.trim()
}

fn find_matching_brace(s: &str, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_fence() {
        let text = "here you go\n```json\n{\"score\": 1}\n```\nthanks";
        assert_eq!(extract_json(text), "{\"score\": 1}");
    }

    #[test]
    fn extracts_bare_object_ignoring_braces_in_strings() {
        let text = "prefix {\"reasoning\": \"use {curly} carefully\", \"score\": 2} suffix";
        assert_eq!(
            extract_json(text),
            "{\"reasoning\": \"use {curly} carefully\", \"score\": 2}"
        );
    }

    #[test]
    fn extracts_object_with_escaped_quote_inside_string() {
        let text = "{\"reasoning\": \"she said \\\"ok\\\"\"}";
        assert_eq!(extract_json(text), text);
    }
}
