//! Transport client for one OpenAI-compatible endpoint profile.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{TransportError, classify_http_error};
use crate::profile::EndpointProfile;
use crate::streaming::decode_sse;
use crate::types::{ChatRequest, ChatResponse, FinishReason, ModelInfo, Usage};

/// How long a model listing stays servable without a refetch.
pub const DEFAULT_MODEL_TTL: Duration = Duration::from_secs(300);

const LOG_BODY_LIMIT: usize = 256;

/// Result of a connection probe. Always resolves; never an `Err`.
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub success: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

struct CacheEntry {
    models: Vec<ModelInfo>,
    fetched_at: Instant,
}

/// TTL cache for model listings, keyed by profile cache key.
///
/// Two concurrent misses may both fetch; the last writer wins. That race
/// is accepted: the entries are equivalent and the cache only exists to
/// avoid hammering `/models`.
struct ModelCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ModelCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<Vec<ModelInfo>> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = entries.get(key)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.models.clone())
    }

    fn put(&self, key: String, models: Vec<ModelInfo>) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(
            key,
            CacheEntry {
                models,
                fetched_at: Instant::now(),
            },
        );
    }
}

/// HTTP client bound to one [`EndpointProfile`].
///
/// All transport and server failures leave this type already normalized
/// into [`TransportError`]; callers never see raw `reqwest` errors.
pub struct ApiClient {
    profile: EndpointProfile,
    http: reqwest::Client,
    cache: ModelCache,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("profile", &self.profile.id())
            .field("base_url", &self.profile.base_url())
            .field("api_key", &self.profile.redacted_key())
            .finish()
    }
}

impl ApiClient {
    pub fn new(profile: EndpointProfile) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            profile,
            http,
            cache: ModelCache::new(DEFAULT_MODEL_TTL),
        })
    }

    /// Override the model-listing TTL. Mostly useful in tests.
    pub fn with_model_ttl(mut self, ttl: Duration) -> Self {
        self.cache = ModelCache::new(ttl);
        self
    }

    pub fn profile(&self) -> &EndpointProfile {
        &self.profile
    }

    /// Probe the endpoint with a model listing.
    pub async fn test_connection(&self) -> ConnectionReport {
        let started = Instant::now();
        match self.list_models(true).await {
            Ok(_) => ConnectionReport {
                success: true,
                elapsed: started.elapsed(),
                error: None,
            },
            Err(e) => ConnectionReport {
                success: false,
                elapsed: started.elapsed(),
                error: Some(format!("{} error: {e}", e.category())),
            },
        }
    }

    /// List models, serving the cache when fresh.
    ///
    /// The cache entry for this profile's cache key is served when younger
    /// than the TTL and `force_refresh` is false; otherwise a live fetch
    /// replaces it.
    pub async fn list_models(&self, force_refresh: bool) -> Result<Vec<ModelInfo>, TransportError> {
        let key = self.profile.cache_key();
        if !force_refresh && let Some(models) = self.cache.get(&key) {
            debug!(profile = self.profile.id(), "model listing served from cache");
            return Ok(models);
        }
        let models = self.fetch_models().await?;
        self.cache.put(key, models.clone());
        Ok(models)
    }

    /// The cached listing for this profile, if still fresh. Never fetches.
    pub fn cached_models(&self) -> Option<Vec<ModelInfo>> {
        self.cache.get(&self.profile.cache_key())
    }

    /// One non-streaming exchange.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, TransportError> {
        let url = format!("{}/chat/completions", self.profile.base_url());
        let body = self.build_body(request, false)?;
        let started = Instant::now();

        let send = self
            .http
            .post(&url)
            .bearer_auth(self.profile.api_key())
            .timeout(self.profile.timeout())
            .json(&body)
            .send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::cancelled()),
            response = send => response.map_err(TransportError::from)?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_http_error(status.as_u16(), &text);
            self.log_exchange("POST", "/chat/completions", Some(status.as_u16()), started, &text);
            return Err(err);
        }

        let read = response.text();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::cancelled()),
            text = read => text.map_err(TransportError::from)?,
        };
        self.log_exchange("POST", "/chat/completions", Some(status.as_u16()), started, &text);

        let wire: WireChatResponse = serde_json::from_str(&text)
            .map_err(|e| TransportError::unknown(format!("unexpected completion body: {e}")))?;
        wire.into_response()
    }

    /// One streaming exchange. `on_delta` fires per textual fragment in
    /// arrival order; the returned response carries the reassembled text
    /// and the final usage.
    pub async fn chat_streaming(
        &self,
        request: &ChatRequest,
        on_delta: impl FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, TransportError> {
        let url = format!("{}/chat/completions", self.profile.base_url());
        let body = self.build_body(request, true)?;
        let started = Instant::now();

        let send = self
            .http
            .post(&url)
            .bearer_auth(self.profile.api_key())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&body)
            .send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::cancelled()),
            response = send => response.map_err(TransportError::from)?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_http_error(status.as_u16(), &text);
            self.log_exchange("POST", "/chat/completions", Some(status.as_u16()), started, &text);
            return Err(err);
        }

        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));
        let outcome = decode_sse(byte_stream, on_delta, cancel).await?;
        if outcome.malformed_frames > 0 {
            warn!(
                profile = self.profile.id(),
                malformed = outcome.malformed_frames,
                "stream contained malformed frames"
            );
        }
        self.log_exchange(
            "POST",
            "/chat/completions",
            Some(status.as_u16()),
            started,
            &outcome.text,
        );

        Ok(ChatResponse {
            content: outcome.text,
            model: request.model.clone(),
            finish_reason: outcome.finish_reason,
            usage: outcome.usage,
        })
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>, TransportError> {
        let url = format!("{}/models", self.profile.base_url());
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.profile.api_key())
            .timeout(self.profile.timeout())
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        self.log_exchange("GET", "/models", Some(status.as_u16()), started, &text);
        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let listing: Value = serde_json::from_str(&text)
            .map_err(|e| TransportError::unknown(format!("unexpected models body: {e}")))?;
        let entries = listing
            .get("data")
            .and_then(|data| data.as_array())
            .ok_or_else(|| TransportError::unknown("invalid models response format"))?;

        Ok(entries
            .iter()
            .filter_map(ModelInfo::from_listing_entry)
            .collect())
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Result<Value, TransportError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.profile.default_model().to_string());
        if model.is_empty() {
            return Err(TransportError::unknown("no model configured for exchange"));
        }

        let mut body = Map::new();
        body.insert("model".into(), Value::String(model));
        body.insert(
            "messages".into(),
            serde_json::to_value(&request.messages)
                .map_err(|e| TransportError::unknown(format!("failed to encode messages: {e}")))?,
        );
        self.profile
            .params()
            .merged_with(&request.params)
            .apply_to(&mut body);
        if stream {
            body.insert("stream".into(), Value::Bool(true));
        }
        Ok(Value::Object(body))
    }

    // Observability only; the credential never reaches this path.
    fn log_exchange(
        &self,
        method: &str,
        path: &str,
        status: Option<u16>,
        started: Instant,
        body: &str,
    ) {
        debug!(
            profile = self.profile.id(),
            method,
            path,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            body = %truncate_for_log(body),
            "api exchange"
        );
    }
}

fn truncate_for_log(body: &str) -> String {
    if body.chars().count() <= LOG_BODY_LIMIT {
        body.to_string()
    } else {
        let cut: String = body.chars().take(LOG_BODY_LIMIT).collect();
        format!("{cut}…")
    }
}

#[derive(Deserialize)]
struct WireChatResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

impl WireChatResponse {
    fn into_response(self) -> Result<ChatResponse, TransportError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::unknown("completion carried no choices"))?;
        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        Ok(ChatResponse {
            content,
            model: self.model,
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
            usage: self.usage.map(|u| {
                Usage::from_reported(u.prompt_tokens, u.completion_tokens, u.total_tokens)
            }),
        })
    }
}
