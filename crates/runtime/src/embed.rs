use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use recall_config::EmbeddingConfig;
use recall_memory::{EmbedFn, EmbedFuture};

/// Embedding backend backed by Ollama's `/api/embeddings` endpoint.
///
/// Transport failures, non-success statuses and empty vectors all resolve
/// to `None`; the vector's dimension is checked by the memory layer.
pub fn ollama_embed_fn(model: &str, base_url: &str) -> EmbedFn {
    let model = model.to_string();
    let url = format!("{}/api/embeddings", base_url.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default();

    Arc::new(move |text: String| -> EmbedFuture {
        let client = client.clone();
        let url = url.clone();
        let model = model.clone();
        Box::pin(async move {
            let body = serde_json::json!({ "model": model, "prompt": text });
            let resp = match client.post(&url).json(&body).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(%url, error = %err, "embedding request failed");
                    return None;
                }
            };
            if !resp.status().is_success() {
                warn!(%url, status = %resp.status(), "embedding request rejected");
                return None;
            }
            let json: Value = resp.json().await.ok()?;
            parse_embedding(&json)
        })
    })
}

pub fn ollama_embed_fn_from_config(config: &EmbeddingConfig) -> EmbedFn {
    ollama_embed_fn(&config.model, &config.base_url)
}

fn parse_embedding(json: &Value) -> Option<Vec<f32>> {
    let embedding = json["embedding"]
        .as_array()?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Vec<f32>>();
    if embedding.is_empty() { None } else { Some(embedding) }
}
