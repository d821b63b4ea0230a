//! End-to-end message orchestration: one exchange from user turn to
//! finalized assistant turn, with bounded retry and cancellation.
//!
//! Orchestration-level conditions (no session, already processing, retry
//! exhausted, ...) are data on the returned [`SendOutcome`], never `Err` —
//! callers render them without exception handling. Transport errors arrive
//! already normalized by the client and are passed through as messages.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::governor::{ExchangeRegistry, RequestId};
use crate::pricing::{calculate_cost, effective_price, estimate_token_count};
use crate::types::{ChatMessage, ChatRequest, Cost, MessageRole, PricePer1k, Usage};

/// Lifecycle of a stored turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    Streaming,
    Complete,
    Failed,
}

/// One stored conversation turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub status: TurnStatus,
    pub usage: Option<Usage>,
    pub cost: Option<Cost>,
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// A finished user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            status: TurnStatus::Complete,
            usage: None,
            cost: None,
            elapsed_ms: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// The assistant placeholder an exchange writes into.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            status: TurnStatus::Pending,
            usage: None,
            cost: None,
            elapsed_ms: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Partial update applied to a stored turn.
#[derive(Debug, Clone, Default)]
pub struct TurnPatch {
    /// Text appended to the existing content (streaming deltas).
    pub append_content: Option<String>,
    /// Full content replacement. Applied after `append_content`.
    pub content: Option<String>,
    pub status: Option<TurnStatus>,
    pub usage: Option<Usage>,
    pub cost: Option<Cost>,
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,
    /// Drop a previously recorded error (retry resets).
    pub clear_error: bool,
}

/// A conversation as the store hands it out.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub turns: Vec<Turn>,
}

/// An attachment whose text extraction already happened upstream.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub text: Option<String>,
}

/// Durability collaborator. The orchestrator owns no persisted state.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn active_conversation(&self) -> Option<Conversation>;
    async fn append_turn(&self, conversation_id: &str, turn: Turn);
    async fn update_turn(&self, turn_id: &str, patch: TurnPatch);
    /// Publish an exchange's usage/cost into the conversation's running totals.
    async fn record_usage(&self, conversation_id: &str, usage: Usage, cost: Option<Cost>);
}

/// Price override lookup, e.g. user-configured per-model prices.
pub trait PriceTable: Send + Sync {
    fn price_override(&self, model_id: &str) -> Option<PricePer1k>;
}

/// A price table with no overrides.
pub struct NoOverrides;

impl PriceTable for NoOverrides {
    fn price_override(&self, _model_id: &str) -> Option<PricePer1k> {
        None
    }
}

/// Why a send was refused before any exchange started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoSession,
    AlreadyProcessing,
    RetryExhausted,
    NotAnAssistantMessage,
    NoPriorUserTurn,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoSession => "no active conversation",
            Self::AlreadyProcessing => "a send is already in progress for this conversation",
            Self::RetryExhausted => "retry attempts exhausted",
            Self::NotAnAssistantMessage => "target is not an assistant message",
            Self::NoPriorUserTurn => "no user turn precedes the target",
        };
        f.write_str(text)
    }
}

/// How a send ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SendStatus {
    Completed,
    Failed,
    Rejected(RejectReason),
}

/// The result object every send/retry resolves with.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub request_id: Option<RequestId>,
    /// Id of the assistant turn the exchange wrote into.
    pub message_id: Option<String>,
    pub status: SendStatus,
    pub error: Option<String>,
    pub usage: Option<Usage>,
    pub cost: Option<Cost>,
    pub elapsed: Duration,
}

impl SendOutcome {
    fn rejected(reason: RejectReason, elapsed: Duration) -> Self {
        Self {
            request_id: None,
            message_id: None,
            status: SendStatus::Rejected(reason),
            error: Some(reason.to_string()),
            usage: None,
            cost: None,
            elapsed,
        }
    }
}

/// Delta sink supplied by the caller to observe streaming fragments.
pub type DeltaSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounded retry configuration. Backoff is linear in the attempt count —
/// wait `retry_delay × attempts_so_far`, nothing before the first retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Drives exchanges end-to-end against one transport client.
///
/// All mutable state (in-flight set, retry counters, exchange registry) is
/// owned by the instance; independent orchestrators never interfere.
pub struct MessageOrchestrator {
    client: Arc<ApiClient>,
    store: Arc<dyn ConversationStore>,
    prices: Arc<dyn PriceTable>,
    registry: ExchangeRegistry,
    in_flight: Arc<Mutex<HashSet<String>>>,
    retry_counts: Mutex<HashMap<String, u32>>,
    currency: String,
}

impl MessageOrchestrator {
    pub fn new(
        client: Arc<ApiClient>,
        store: Arc<dyn ConversationStore>,
        prices: Arc<dyn PriceTable>,
    ) -> Self {
        Self {
            client,
            store,
            prices,
            registry: ExchangeRegistry::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            retry_counts: Mutex::new(HashMap::new()),
            currency: "USD".to_string(),
        }
    }

    /// Abort one in-flight exchange. Partial state is left as-is.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.registry.cancel(request_id)
    }

    /// Abort every exchange issued by this orchestrator.
    pub fn cancel_all(&self) {
        self.registry.cancel_all();
    }

    /// Retry attempts recorded for an assistant message.
    pub fn retry_attempts(&self, message_id: &str) -> u32 {
        lock_unpoisoned(&self.retry_counts)
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    /// Send a new user turn through the active conversation.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
        sink: Option<DeltaSink>,
    ) -> SendOutcome {
        let started = Instant::now();
        let Some(conversation) = self.store.active_conversation().await else {
            return SendOutcome::rejected(RejectReason::NoSession, started.elapsed());
        };
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, &conversation.id) else {
            return SendOutcome::rejected(RejectReason::AlreadyProcessing, started.elapsed());
        };

        let user_turn = Turn::user(compose_user_content(text, attachments));
        let mut messages = wire_messages(&conversation.turns);
        messages.push(ChatMessage::user(user_turn.content.clone()));
        self.store.append_turn(&conversation.id, user_turn).await;

        let assistant = Turn::assistant_placeholder();
        let assistant_id = assistant.id.clone();
        self.store.append_turn(&conversation.id, assistant).await;

        self.run_exchange(&conversation.id, &assistant_id, messages, sink, started)
            .await
    }

    /// Re-run the exchange that produced a failed assistant message.
    pub async fn retry_message(
        &self,
        assistant_message_id: &str,
        policy: &RetryPolicy,
        sink: Option<DeltaSink>,
    ) -> SendOutcome {
        let started = Instant::now();
        let Some(conversation) = self.store.active_conversation().await else {
            return SendOutcome::rejected(RejectReason::NoSession, started.elapsed());
        };

        let Some(target_index) = conversation
            .turns
            .iter()
            .position(|t| t.id == assistant_message_id)
        else {
            return SendOutcome::rejected(RejectReason::NotAnAssistantMessage, started.elapsed());
        };
        if conversation.turns[target_index].role != MessageRole::Assistant {
            return SendOutcome::rejected(RejectReason::NotAnAssistantMessage, started.elapsed());
        }
        let Some(user_index) = conversation.turns[..target_index]
            .iter()
            .rposition(|t| t.role == MessageRole::User)
        else {
            return SendOutcome::rejected(RejectReason::NoPriorUserTurn, started.elapsed());
        };

        let Some(_guard) = InFlightGuard::claim(&self.in_flight, &conversation.id) else {
            return SendOutcome::rejected(RejectReason::AlreadyProcessing, started.elapsed());
        };

        // Count the attempt before it runs, so a crash mid-retry still
        // counts against the cap.
        let attempts_before = {
            let mut counts = lock_unpoisoned(&self.retry_counts);
            let count = counts.entry(assistant_message_id.to_string()).or_insert(0);
            if *count >= policy.max_retries {
                return SendOutcome::rejected(RejectReason::RetryExhausted, started.elapsed());
            }
            let before = *count;
            *count += 1;
            before
        };

        if attempts_before > 0 {
            tokio::time::sleep(policy.retry_delay * attempts_before).await;
        }

        // Reset the placeholder; the same turn id is reused across retries.
        self.store
            .update_turn(
                assistant_message_id,
                TurnPatch {
                    content: Some(String::new()),
                    status: Some(TurnStatus::Pending),
                    clear_error: true,
                    ..Default::default()
                },
            )
            .await;

        let messages = wire_messages(&conversation.turns[..=user_index]);
        let outcome = self
            .run_exchange(
                &conversation.id,
                assistant_message_id,
                messages,
                sink,
                started,
            )
            .await;

        if outcome.status == SendStatus::Completed {
            lock_unpoisoned(&self.retry_counts).remove(assistant_message_id);
        }
        outcome
    }

    async fn run_exchange(
        &self,
        conversation_id: &str,
        assistant_id: &str,
        messages: Vec<ChatMessage>,
        sink: Option<DeltaSink>,
        started: Instant,
    ) -> SendOutcome {
        let (request_id, token) = self.registry.register();
        let request = ChatRequest::new(messages);
        debug!(%request_id, conversation = conversation_id, streaming = sink.is_some(), "exchange started");

        let result = match &sink {
            Some(sink) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                let stream = self.client.chat_streaming(
                    &request,
                    |delta: &str| {
                        sink.as_ref()(delta);
                        let _ = tx.send(delta.to_string());
                    },
                    &token,
                );
                let store = self.store.clone();
                let turn_id = assistant_id.to_string();
                // Apply deltas to the placeholder in arrival order while
                // the stream is still running.
                let apply = async move {
                    while let Some(delta) = rx.recv().await {
                        store
                            .update_turn(
                                &turn_id,
                                TurnPatch {
                                    append_content: Some(delta),
                                    status: Some(TurnStatus::Streaming),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                };
                let (result, ()) = tokio::join!(stream, apply);
                result
            }
            None => self.client.chat(&request, &token).await,
        };
        self.registry.deregister(request_id);

        let elapsed = started.elapsed();
        match result {
            Ok(response) => {
                let usage = response.usage.unwrap_or_else(|| {
                    estimated_usage(&request.messages, &response.content)
                });
                let cost = self.cost_for_exchange(request.model.as_deref(), usage);
                self.store
                    .update_turn(
                        assistant_id,
                        TurnPatch {
                            content: Some(response.content),
                            status: Some(TurnStatus::Complete),
                            usage: Some(usage),
                            cost: cost.clone(),
                            elapsed_ms: Some(elapsed.as_millis() as u64),
                            clear_error: true,
                            ..Default::default()
                        },
                    )
                    .await;
                self.store
                    .record_usage(conversation_id, usage, cost.clone())
                    .await;
                debug!(%request_id, elapsed_ms = elapsed.as_millis() as u64, "exchange completed");
                SendOutcome {
                    request_id: Some(request_id),
                    message_id: Some(assistant_id.to_string()),
                    status: SendStatus::Completed,
                    error: None,
                    usage: Some(usage),
                    cost,
                    elapsed,
                }
            }
            Err(e) => {
                // Keep whatever partial text streamed in; only the status
                // and the error message change.
                let message = e.to_string();
                self.store
                    .update_turn(
                        assistant_id,
                        TurnPatch {
                            status: Some(TurnStatus::Failed),
                            error: Some(message.clone()),
                            elapsed_ms: Some(elapsed.as_millis() as u64),
                            ..Default::default()
                        },
                    )
                    .await;
                debug!(%request_id, error = %message, "exchange failed");
                SendOutcome {
                    request_id: Some(request_id),
                    message_id: Some(assistant_id.to_string()),
                    status: SendStatus::Failed,
                    error: Some(message),
                    usage: None,
                    cost: None,
                    elapsed,
                }
            }
        }
    }

    fn cost_for_exchange(&self, request_model: Option<&str>, usage: Usage) -> Option<Cost> {
        let model_id = match request_model {
            Some(m) => m.to_string(),
            None => self.client.profile().default_model().to_string(),
        };
        let override_price = self.prices.price_override(&model_id);
        // Provider-reported prices come from the cached listing only; a
        // send never triggers a hidden /models fetch.
        let price = match self
            .client
            .cached_models()
            .and_then(|models| models.into_iter().find(|m| m.id == model_id))
        {
            Some(model) => effective_price(&model, override_price),
            None => override_price,
        }?;
        Some(calculate_cost(
            usage,
            price.input,
            price.output,
            self.currency.clone(),
        ))
    }
}

/// Holds the per-conversation send slot; released on drop.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut guard = lock_unpoisoned(set);
        if !guard.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_unpoisoned(&self.set).remove(&self.id);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Inline attachment text into the user content; attachments without
/// extractable text are referenced by name only.
fn compose_user_content(text: &str, attachments: &[Attachment]) -> String {
    let mut content = text.to_string();
    for attachment in attachments {
        match &attachment.text {
            Some(extracted) => {
                content.push_str(&format!("\n\n[Attachment: {}]\n{extracted}", attachment.name));
            }
            None => {
                content.push_str(&format!(
                    "\n\n[Attachment: {}] (content unavailable)",
                    attachment.name
                ));
            }
        }
    }
    content
}

/// Project finished turns into the wire-level message list.
fn wire_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .filter(|t| t.status == TurnStatus::Complete && !t.content.is_empty())
        .map(|t| ChatMessage {
            role: t.role,
            content: t.content.clone(),
        })
        .collect()
}

fn estimated_usage(messages: &[ChatMessage], completion: &str) -> Usage {
    let prompt: u32 = messages
        .iter()
        .map(|m| estimate_token_count(&m.content))
        .sum();
    Usage::from_counts(prompt, estimate_token_count(completion))
}
