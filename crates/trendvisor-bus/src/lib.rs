//! Publish/subscribe message bus for the Trendvisor pipeline.
//!
//! Events travel on one channel per [`EventType`](trendvisor_core::EventType),
//! namespaced as `<prefix>:<TYPE>`, so an agent names the event types it
//! wants and never filters in process.
//!
//! # Main types
//!
//! - [`MessageBus`]: Trait for publishing and subscribing.
//! - [`InMemoryMessageBus`]: Broadcast-channel implementation.
//! - [`Subscription`]: An attached subscription with a cancellable receive loop.
//! - [`EventHandler`]: Callback invoked for each delivered event.

/// Bus trait, configuration and subscriptions.
pub mod bus;
/// In-process broadcast bus.
pub mod memory;

pub use bus::{
    BusConfig, Delivery, EventHandler, MessageBus, Received, SharedBus, Subscription,
    DEFAULT_CHANNEL_PREFIX,
};
pub use memory::InMemoryMessageBus;
