use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use trendvisor_core::{Event, EventPayload, EventType, TrendvisorError, TrendvisorResult};

use crate::bus::{BusConfig, Delivery, MessageBus, Subscription};

/// In-process bus. Every channel is a `tokio::sync::broadcast` channel of
/// serialized envelopes, created on first use.
pub struct InMemoryMessageBus {
    config: BusConfig,
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryMessageBus {
    /// Creates a bus with the given configuration.
    pub fn new(config: BusConfig) -> TrendvisorResult<Self> {
        if config.channel_capacity == 0 {
            return Err(TrendvisorError::BusUnavailable(
                "channel capacity must be greater than zero".into(),
            ));
        }
        Ok(Self {
            config,
            channels: RwLock::new(HashMap::new()),
        })
    }

    fn sender(&self, event_type: EventType) -> (String, broadcast::Sender<String>) {
        let name = self.config.channel_name(event_type);
        if let Some(tx) = self.channels.read().get(&name) {
            return (name, tx.clone());
        }
        let mut channels = self.channels.write();
        let tx = channels
            .entry(name.clone())
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .clone();
        (name, tx)
    }

    /// Number of receivers currently attached to the channel of `event_type`.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        let name = self.config.channel_name(event_type);
        self.channels
            .read()
            .get(&name)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self {
            config: BusConfig::default(),
            channels: RwLock::new(HashMap::new()),
        }
    }
}

impl MessageBus for InMemoryMessageBus {
    fn config(&self) -> &BusConfig {
        &self.config
    }

    fn publish(&self, source_agent: &str, payload: EventPayload) -> TrendvisorResult<Event> {
        let event = Event::new(source_agent, payload);
        let raw = event.to_json()?;
        let (channel, tx) = self.sender(event.event_type());
        match tx.send(raw) {
            Ok(receivers) => debug!(
                channel = %channel,
                task_id = %event.task_id(),
                receivers,
                "Event published"
            ),
            // No subscriber is attached; the event is gone.
            Err(_) => debug!(
                channel = %channel,
                task_id = %event.task_id(),
                "Event published with no subscribers"
            ),
        }
        Ok(event)
    }

    fn publish_raw(&self, event_type: EventType, raw: String) -> TrendvisorResult<usize> {
        let (_, tx) = self.sender(event_type);
        Ok(tx.send(raw).unwrap_or(0))
    }

    fn subscribe(&self, event_types: &[EventType]) -> TrendvisorResult<Subscription> {
        let mut types = event_types.to_vec();
        types.sort();
        types.dedup();
        if types.is_empty() {
            return Err(TrendvisorError::Validation(
                "a subscription needs at least one event type".into(),
            ));
        }

        let mut channels = Vec::with_capacity(types.len());
        let mut streams = Vec::with_capacity(types.len());
        for &event_type in &types {
            let (name, tx) = self.sender(event_type);
            channels.push(name);
            let per_channel = BroadcastStream::new(tx.subscribe())
                .map(move |item| match item {
                    Ok(raw) => Delivery::Message { event_type, raw },
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => Delivery::Lagged {
                        event_type,
                        skipped,
                    },
                })
                .boxed();
            streams.push(per_channel);
        }

        debug!(channels = ?channels, "Subscription attached");
        Ok(Subscription::new(
            types,
            channels,
            stream::select_all(streams).boxed(),
            self.config.poll_interval,
        ))
    }
}
