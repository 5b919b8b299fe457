//! Multi-agent task claiming.
//!
//! Agents with roles claim and advance tasks of a shared project. A claim
//! succeeds only when the agent's role grants the action, the task's
//! dependencies are complete, and the status change is a legal lifecycle
//! transition. The write itself is a conditional update against the
//! task's version, so two agents racing for one task cannot both win.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod rbac;
pub mod store;

pub use config::{ClaimConfig, Config};
pub use error::{Error, Result};
pub use orchestration::{AgentClaim, ClaimCoordinator, ClaimEvent, ClaimReceipt, ClaimStage, RetryPolicy};
