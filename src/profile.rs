//! Endpoint profiles: one backend target plus its default parameters.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

/// Default request timeout applied when the profile does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CACHE_KEY_PREFIX_LEN: usize = 8;

/// Generation parameters shared by all exchanges against a profile.
///
/// `None` fields are omitted from the wire body entirely so the endpoint's
/// own defaults apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub stop: Option<Vec<String>>,
}

impl GenerationParams {
    /// Layer request-level overrides on top of these defaults.
    pub fn merged_with(&self, overrides: &GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            stop: overrides.stop.clone().or_else(|| self.stop.clone()),
        }
    }

    /// Write the set fields into a request body.
    pub fn apply_to(&self, body: &mut Map<String, Value>) {
        if let Some(v) = self.temperature {
            body.insert("temperature".into(), v.into());
        }
        if let Some(v) = self.top_p {
            body.insert("top_p".into(), v.into());
        }
        if let Some(v) = self.max_tokens {
            body.insert("max_tokens".into(), v.into());
        }
        if let Some(v) = self.frequency_penalty {
            body.insert("frequency_penalty".into(), v.into());
        }
        if let Some(v) = self.presence_penalty {
            body.insert("presence_penalty".into(), v.into());
        }
        if let Some(stop) = &self.stop {
            body.insert(
                "stop".into(),
                Value::Array(stop.iter().map(|s| Value::String(s.clone())).collect()),
            );
        }
    }
}

/// One backend target: base URL, credential, defaults.
///
/// Immutable per exchange; a transport client holds its own copy.
#[derive(Debug, Clone)]
pub struct EndpointProfile {
    id: String,
    base_url: String,
    api_key: SecretString,
    default_model: String,
    params: GenerationParams,
    timeout: Duration,
}

impl EndpointProfile {
    pub fn new(
        id: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: SecretString::from(api_key.into()),
            default_model: String::new(),
            params: GenerationParams::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The bearer credential. Only the transport layer should call this.
    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Cache key for model listings: endpoint plus a credential prefix,
    /// never the full credential, so distinct profiles do not collide.
    pub fn cache_key(&self) -> String {
        let key = self.api_key.expose_secret();
        let prefix: String = key.chars().take(CACHE_KEY_PREFIX_LEN).collect();
        format!("{}#{}", self.base_url(), prefix)
    }

    /// Credential rendered safe for logs and diagnostics.
    pub fn redacted_key(&self) -> String {
        let key = self.api_key.expose_secret();
        if key.len() <= CACHE_KEY_PREFIX_LEN {
            return "***".to_string();
        }
        let prefix: String = key.chars().take(CACHE_KEY_PREFIX_LEN).collect();
        format!("{prefix}***")
    }
}
