//! Orchestration layer: claim coordination over the external task store.
//!
//! Agents run their claim loops independently. Coordination between them is
//! pushed entirely to the store's conditional write; the coordinator only
//! re-evaluates its checks on fresh state and retries on conflict.

mod coordinator;
mod retry;

pub use coordinator::{AgentClaim, ClaimCoordinator, ClaimEvent, ClaimReceipt, ClaimStage};
pub use retry::RetryPolicy;
