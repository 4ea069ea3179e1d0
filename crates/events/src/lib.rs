//! Domain event bus for the training-flow platform.
//!
//! The engines publish a [`DomainEvent`] after every persisted transition
//! (version activation, assignment lifecycle changes, completion
//! cascades). External collaborators (chat-bot notifications, reminder
//! scheduling, reporting) subscribe through [`EventBus`]; none of their
//! delivery machinery lives in this workspace.

pub mod bus;

pub use bus::{DomainEvent, EventBus};
