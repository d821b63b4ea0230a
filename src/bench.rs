//! Bulk performance testing: fire many model/prompt combinations and
//! collect per-exchange results.
//!
//! The runner drives the transport client directly through the bounded-run
//! primitive — the message orchestrator is not involved, and one failing
//! exchange never aborts the sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::ApiClient;
use crate::error::TransportError;
use crate::governor::run_bounded;
use crate::pricing::calculate_cost;
use crate::profile::GenerationParams;
use crate::types::{ChatMessage, ChatRequest, Cost, PricePer1k, Usage};

/// Default number of exchanges in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default bounded wait per exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// One bulk-test sweep: every model × prompt combination.
#[derive(Debug, Clone)]
pub struct BenchPlan {
    pub models: Vec<String>,
    pub prompts: Vec<String>,
    pub concurrency: usize,
    pub timeout: Duration,
    pub params: GenerationParams,
    /// Per-model price overrides used for cost records.
    pub prices: HashMap<String, PricePer1k>,
}

impl BenchPlan {
    pub fn new(models: Vec<String>, prompts: Vec<String>) -> Self {
        Self {
            models,
            prompts,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
            params: GenerationParams::default(),
            prices: HashMap::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_price(mut self, model: impl Into<String>, price: PricePer1k) -> Self {
        self.prices.insert(model.into(), price);
        self
    }
}

/// Result of one exchange in a sweep.
#[derive(Debug, Clone)]
pub struct BenchRecord {
    pub model: String,
    pub prompt_index: usize,
    pub success: bool,
    pub error: Option<String>,
    pub latency: Duration,
    pub usage: Option<Usage>,
    pub cost: Option<Cost>,
}

/// Runs bulk sweeps against one transport client.
pub struct BenchRunner {
    client: Arc<ApiClient>,
}

impl BenchRunner {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Run the full sweep. Records come back in model-major order,
    /// aligned with the plan's model × prompt matrix.
    pub async fn run(&self, plan: &BenchPlan) -> Vec<BenchRecord> {
        // Warm the model cache so cost lookups can use listed prices.
        // A failed listing only means costs fall back to plan overrides.
        let _ = self.client.list_models(false).await;

        let mut jobs = Vec::with_capacity(plan.models.len() * plan.prompts.len());
        for model in &plan.models {
            for (prompt_index, prompt) in plan.prompts.iter().enumerate() {
                jobs.push(self.run_one(plan, model.clone(), prompt_index, prompt.clone()));
            }
        }

        let total = jobs.len();
        info!(
            exchanges = total,
            concurrency = plan.concurrency,
            "bulk test sweep started"
        );
        let results = run_bounded(jobs, plan.concurrency).await;
        let records: Vec<BenchRecord> = results
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();
        let failures = records.iter().filter(|r| !r.success).count();
        info!(exchanges = total, failures, "bulk test sweep finished");
        records
    }

    async fn run_one(
        &self,
        plan: &BenchPlan,
        model: String,
        prompt_index: usize,
        prompt: String,
    ) -> Result<BenchRecord, TransportError> {
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_model(model.clone())
            .with_params(plan.params.clone());
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let outcome = tokio::time::timeout(plan.timeout, self.client.chat(&request, &cancel)).await;
        let latency = started.elapsed();

        let record = match outcome {
            // Timed out: a bounded-wait miss counts as a network failure
            // and is not retried.
            Err(_) => BenchRecord {
                model,
                prompt_index,
                success: false,
                error: Some(
                    TransportError::network(format!(
                        "exchange timed out after {}ms",
                        plan.timeout.as_millis()
                    ))
                    .to_string(),
                ),
                latency,
                usage: None,
                cost: None,
            },
            Ok(Err(e)) => BenchRecord {
                model,
                prompt_index,
                success: false,
                error: Some(e.to_string()),
                latency,
                usage: None,
                cost: None,
            },
            Ok(Ok(response)) => {
                let usage = response.usage;
                let cost = usage.and_then(|u| self.cost_for(plan, &model, u));
                BenchRecord {
                    model,
                    prompt_index,
                    success: true,
                    error: None,
                    latency,
                    usage,
                    cost,
                }
            }
        };
        Ok(record)
    }

    fn cost_for(&self, plan: &BenchPlan, model: &str, usage: Usage) -> Option<Cost> {
        let price = plan.prices.get(model).copied().or_else(|| {
            self.client
                .cached_models()
                .and_then(|models| models.into_iter().find(|m| m.id == model))
                .and_then(|m| m.price)
        })?;
        Some(calculate_cost(usage, price.input, price.output, "USD"))
    }
}
