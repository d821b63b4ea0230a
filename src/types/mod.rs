//! Core data types shared across the client, orchestrator and runner.

mod chat;
mod models;
mod usage;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, FinishReason, MessageRole};
pub use models::{ModelInfo, ModelKind, PricePer1k};
pub use usage::{Cost, Usage};
