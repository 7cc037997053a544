//! The agent loop of cxloop.
//!
//! The orchestrator follows a **Plan → Act → Observe** cycle:
//!
//! 1. **Receive** a user message and lease its session
//! 2. **Send history to the model** via the configured gateway
//! 3. **Decode** the raw output into exactly one decision
//! 4. **If tool calls**: validate, dispatch in order, record each step,
//!    append the results and loop back to step 2
//! 5. **If an answer**: append it and return it with the step trace
//!
//! The loop ends on an answer or on one of the abort conditions in
//! [`AbortReason`].

pub mod decoder;
pub mod orchestrator;

pub use decoder::ActionDecoder;
pub use orchestrator::{AbortReason, ChatReply, ChatRequest, LoopState, Orchestrator, RequestAborted};
