//! Invocation layer: one logical chat completion over an ordered cascade of
//! candidate models.

pub mod backoff;
pub mod cascade;
pub mod invoker;
pub mod traits;
pub mod types;

pub use backoff::FailoverBackoff;
pub use cascade::{candidate_models, ThinkingPolicy};
pub use invoker::{InvokerSettings, ModelInvoker};
pub use traits::{ChatTransport, ChunkStream};
pub use types::{
    AttemptOutcome, ChatMessage, ChatRequest, InvocationAttempt, Role, TuningParams,
};
