//! LLM provider abstraction.
//!
//! Two capabilities, both behind one trait: structured-JSON generation
//! (blocking, schema-validated) and token streaming (for the chat SSE
//! surface). Providers are plain reqwest clients; nothing here knows about
//! investigations or tools.

pub mod anthropic;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod schemas;

pub use provider::{
    parse_llm_json, GenerateOptions, LlmChunk, LlmError, LlmMessage, LlmResponse, LlmProvider,
    LlmRole, TokenUsage,
};
pub use registry::{provider_from_env, LlmClient};
pub use schemas::{
    Clamped, EnrichmentResponse, RcaSynthesisResponse, ToolCallRequest, ToolPlanResponse,
};
