//! # cxloop Core
//!
//! Domain types, traits, and error definitions for the cxloop customer-service
//! agent loop. This crate has **no framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here (`Tool`, `ModelGateway`).
//! Implementations live in their respective crates. This enables:
//! - Swapping the reasoning backend via configuration
//! - Easy testing with scripted gateways and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod decision;
pub mod error;
pub mod event;
pub mod model;
pub mod tool;
pub mod trace;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, MixedOutputPolicy};
pub use decision::{AgentDecision, ToolInvocation};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use model::{InferenceRequest, ModelGateway, RawModelOutput, RawToolCall, ToolDefinition};
pub use tool::{FieldKind, FieldSpec, Tool, ToolOutput, ToolRegistry, ToolSchema};
pub use trace::{StepOutcome, StepRecord, StepTrace};
pub use turn::{SessionId, Turn, TurnRole};
