//! Model gateway implementations for cxloop.
//!
//! All gateways implement the `cxloop_core::ModelGateway` trait.
//! [`build_from_config`] selects and wraps the configured backend.

pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod scripted;

pub use openai_compat::OpenAiCompatGateway;
pub use retry::RetryingGateway;
pub use router::build_from_config;
pub use scripted::ScriptedGateway;
