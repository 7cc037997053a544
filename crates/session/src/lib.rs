//! Session store for cxloop.
//!
//! Keyed conversational memory with a create / read / append / evict
//! lifecycle. Storage is in-memory only; optional capacity and idle-TTL
//! policies reclaim least-recently-accessed sessions first.

pub mod session;
pub mod store;

pub use session::{Session, SessionInfo};
pub use store::{SessionLease, SessionPolicy, SessionStore};
