use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trendvisor_core::{Event, EventPayload, EventType, TrendvisorResult};

/// Default channel namespace: events travel on `events:<TYPE>`.
pub const DEFAULT_CHANNEL_PREFIX: &str = "events";

/// Bus tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Namespace prepended to every channel name. Empty means bare type names.
    pub channel_prefix: String,
    /// Bounded wait of a single receive; the cancel token is checked this often.
    pub poll_interval: Duration,
    /// Per-channel buffer. Slow subscribers beyond this lag and lose messages.
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            poll_interval: Duration::from_secs(1),
            channel_capacity: 256,
        }
    }
}

impl BusConfig {
    /// Channel name for an event type, e.g. `events:TASK_CREATED`.
    pub fn channel_name(&self, event_type: EventType) -> String {
        if self.channel_prefix.is_empty() {
            event_type.as_str().to_string()
        } else {
            format!("{}:{}", self.channel_prefix, event_type)
        }
    }
}

/// Typed publish/subscribe transport.
///
/// Delivery is fire-and-forget: no acknowledgement, no persistence, and a
/// subscriber only sees messages published after it attached.
pub trait MessageBus: Send + Sync {
    /// Configuration the bus was built with.
    fn config(&self) -> &BusConfig;

    /// Wraps `payload` in an envelope and delivers it to every current
    /// subscriber of the payload's event type. Returns the published event.
    fn publish(&self, source_agent: &str, payload: EventPayload) -> TrendvisorResult<Event>;

    /// Pushes an undecoded message onto the channel of `event_type`.
    /// Returns the number of subscribers that received it.
    fn publish_raw(&self, event_type: EventType, raw: String) -> TrendvisorResult<usize>;

    /// Attaches to the union of the channels named by `event_types`.
    ///
    /// Attachment happens before this returns, so anything published after
    /// the call is delivered to the returned [`Subscription`].
    fn subscribe(&self, event_types: &[EventType]) -> TrendvisorResult<Subscription>;
}

/// Shared bus handle.
pub type SharedBus = Arc<dyn MessageBus>;

/// Receives decoded events from a [`Subscription`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event. Runs on the subscription's execution context; the
    /// next message is not received until this returns.
    async fn on_event(&self, event: Event);
}

/// One item coming off the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A raw message from the channel of `event_type`.
    Message {
        /// Channel the message arrived on.
        event_type: EventType,
        /// Undecoded wire payload.
        raw: String,
    },
    /// The receiver fell behind and `skipped` messages were lost.
    Lagged {
        /// Channel that overflowed.
        event_type: EventType,
        /// Number of lost messages.
        skipped: u64,
    },
}

/// Outcome of a single bounded receive.
#[derive(Debug)]
pub enum Received {
    /// A valid event.
    Event(Event),
    /// Nothing arrived within the poll interval.
    Timeout,
    /// A message arrived but was malformed or lost; already logged.
    Dropped,
    /// The transport closed; no further messages will arrive.
    Closed,
}

/// An attached subscription to one or more event-type channels.
pub struct Subscription {
    event_types: Vec<EventType>,
    channels: Vec<String>,
    stream: BoxStream<'static, Delivery>,
    poll_interval: Duration,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channels", &self.channels)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Builds a subscription over an already-attached delivery stream.
    pub fn new(
        event_types: Vec<EventType>,
        channels: Vec<String>,
        stream: BoxStream<'static, Delivery>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            event_types,
            channels,
            stream,
            poll_interval,
        }
    }

    /// Event types this subscription is attached to.
    pub fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    /// Channel names this subscription is attached to.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Waits at most one poll interval for the next message and decodes it.
    pub async fn recv(&mut self) -> Received {
        match tokio::time::timeout(self.poll_interval, self.stream.next()).await {
            Err(_) => Received::Timeout,
            Ok(None) => Received::Closed,
            Ok(Some(Delivery::Lagged {
                event_type,
                skipped,
            })) => {
                warn!(event_type = %event_type, skipped, "Subscriber lagged; messages lost");
                Received::Dropped
            }
            Ok(Some(Delivery::Message { event_type, raw })) => decode(event_type, &raw),
        }
    }

    /// Receives until `cancel` is observed, handing each valid event to
    /// `handler`.
    ///
    /// Cancellation is cooperative: it is checked between receives, so the
    /// loop exits within one poll interval of the cancel, or after the
    /// in-flight handler returns, whichever is later.
    pub async fn listen(mut self, handler: &dyn EventHandler, cancel: &CancellationToken) {
        info!(channels = ?self.channels, "Listening for events");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.recv().await {
                Received::Event(event) => handler.on_event(event).await,
                Received::Timeout | Received::Dropped => {}
                Received::Closed => {
                    warn!(channels = ?self.channels, "Transport closed; subscription ending");
                    break;
                }
            }
        }
        info!(channels = ?self.channels, "Subscription detached");
    }
}

fn decode(channel_type: EventType, raw: &str) -> Received {
    match Event::from_json(raw) {
        Ok(event) if event.event_type() == channel_type => {
            debug!(
                event_type = %channel_type,
                task_id = %event.task_id(),
                event_id = %event.event_id,
                "Event delivered"
            );
            Received::Event(event)
        }
        Ok(event) => {
            warn!(
                channel_type = %channel_type,
                event_type = %event.event_type(),
                "Dropping event published on the wrong channel"
            );
            Received::Dropped
        }
        Err(e) => {
            warn!(event_type = %channel_type, error = %e, "Dropping malformed message");
            Received::Dropped
        }
    }
}
