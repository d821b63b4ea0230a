//! # Chatbench
//!
//! Orchestration and streaming engine for OpenAI-compatible chat APIs:
//! issue exchanges against a configurable endpoint, decode server-sent
//! incremental responses, keep concurrent exchanges bounded and
//! cancellable, retry failed exchanges under a linear-backoff policy, and
//! derive token/cost accounting from the results.
//!
//! The crate owns no persisted state; conversations and price overrides
//! live behind the [`orchestrator::ConversationStore`] and
//! [`orchestrator::PriceTable`] collaborator traits.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use chatbench::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let profile = EndpointProfile::new("main", "your-api-key", "https://api.openai.com/v1")
//!         .with_model("gpt-4o-mini");
//!     let client = ApiClient::new(profile)?;
//!
//!     let report = client.test_connection().await;
//!     println!("reachable: {} ({:?})", report.success, report.elapsed);
//!
//!     let request = ChatRequest::new(vec![ChatMessage::user("Hello!")]);
//!     let response = client.chat(&request, &CancellationToken::new()).await?;
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod bench;
pub mod client;
pub mod error;
pub mod governor;
pub mod observability;
pub mod orchestrator;
pub mod pricing;
pub mod profile;
pub mod streaming;
pub mod types;

/// The commonly used surface in one import.
pub mod prelude {
    pub use crate::bench::{BenchPlan, BenchRecord, BenchRunner};
    pub use crate::client::{ApiClient, ConnectionReport};
    pub use crate::error::{ErrorCategory, TransportError};
    pub use crate::governor::{ExchangePermit, ExchangeRegistry, PermitPool, RequestId, run_bounded};
    pub use crate::orchestrator::{
        Attachment, Conversation, ConversationStore, DeltaSink, MessageOrchestrator, PriceTable,
        RejectReason, RetryPolicy, SendOutcome, SendStatus, Turn, TurnPatch, TurnStatus,
    };
    pub use crate::pricing::{calculate_cost, effective_price, estimate_token_count};
    pub use crate::profile::{EndpointProfile, GenerationParams};
    pub use crate::streaming::{SseDecoder, StreamOutcome, decode_sse};
    pub use crate::types::{
        ChatMessage, ChatRequest, ChatResponse, Cost, FinishReason, MessageRole, ModelInfo,
        ModelKind, PricePer1k, Usage,
    };
    pub use tokio_util::sync::CancellationToken;
}
