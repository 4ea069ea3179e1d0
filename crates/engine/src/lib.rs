//! Engine surface of the training-flow platform.
//!
//! Library-level services invoked in-process by command handlers:
//!
//! - [`VersioningEngine`]: freezes immutable content versions and keeps
//!   exactly one active per flow.
//! - [`ProgressEngine`]: instantiates per-assignment progress trees and
//!   rolls completion state up from component to step to flow to user.
//! - [`AssignmentEngine`]: the outer per-user record and its lifecycle.
//!
//! All three are written against the storage contracts in
//! `ramp_core::store` and publish [`ramp_events::DomainEvent`]s after
//! their writes are persisted.

pub mod assignment;
pub mod progress;
pub mod versioning;

pub use assignment::{AssignRequest, AssignmentEngine};
pub use progress::ProgressEngine;
pub use versioning::VersioningEngine;
