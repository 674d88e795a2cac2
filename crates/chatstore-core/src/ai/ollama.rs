use anyhow::{anyhow, Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

/// One line of a streaming `/api/generate` body
#[derive(Deserialize)]
struct OllamaStreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn query(&self, model: &str, prompt: &str) -> Result<String> {
        let response = self.generate(model, prompt, false).await?;
        let ollama_response: OllamaResponse = response.json().await?;
        Ok(ollama_response.response)
    }

    /// Stream a completion, handing each fragment to `on_chunk` as it arrives.
    ///
    /// Returns the full text once the server reports `done`.
    pub async fn stream<F>(&self, model: &str, prompt: &str, mut on_chunk: F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let response = self.generate(model, prompt, true).await?;

        let mut body = response.bytes_stream();
        let mut decoder = NdjsonDecoder::default();
        let mut full = String::new();

        while let Some(bytes) = body.next().await {
            let bytes = bytes.context("Ollama stream interrupted")?;
            for line in decoder.push(&bytes) {
                if apply_stream_line(&line, &mut full, &mut on_chunk)? {
                    return Ok(full);
                }
            }
        }

        if let Some(line) = decoder.finish() {
            apply_stream_line(&line, &mut full, &mut on_chunk)?;
        }

        tracing::debug!(chars = full.len(), "Ollama stream ended without done marker");
        Ok(full)
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    async fn generate(&self, model: &str, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model,
            prompt,
            stream,
        };

        tracing::debug!(%url, model, stream, "Ollama generate");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Could not reach Ollama at {}", self.base_url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Ollama request failed with status: {}. Make sure Ollama is running with: ollama serve",
                response.status()
            ));
        }

        Ok(response)
    }
}

/// Returns true when the line carries the `done` marker.
fn apply_stream_line<F>(line: &str, full: &mut String, on_chunk: &mut F) -> Result<bool>
where
    F: FnMut(&str),
{
    let part: OllamaStreamLine = serde_json::from_str(line)
        .with_context(|| format!("Malformed Ollama stream line: {line}"))?;

    if let Some(error) = part.error {
        return Err(anyhow!("Ollama error: {error}"));
    }

    if !part.response.is_empty() {
        on_chunk(&part.response);
        full.push_str(&part.response);
    }

    Ok(part.done)
}

/// Splits a byte stream into newline-delimited lines.
///
/// Works on bytes so a multi-byte character split across chunks is reassembled
/// before decoding. Blank lines are skipped.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left after the last newline
    pub fn finish(self) -> Option<String> {
        decode_line(&self.buffer)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
