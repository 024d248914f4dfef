use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TrendvisorError, TrendvisorResult};

/// The closed set of event types carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Orchestrator → Collection Agent.
    TaskCreated,
    /// Collection Agent → Analysis Agent.
    CollectionComplete,
    /// Analysis Agent → Orchestrator.
    TaskComplete,
    /// Any stage agent → Orchestrator.
    TaskFailed,
}

impl EventType {
    /// All event types, in pipeline order.
    pub const ALL: [EventType; 4] = [
        EventType::TaskCreated,
        EventType::CollectionComplete,
        EventType::TaskComplete,
        EventType::TaskFailed,
    ];

    /// Wire name, e.g. `TASK_CREATED`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskCreated => "TASK_CREATED",
            EventType::CollectionComplete => "COLLECTION_COMPLETE",
            EventType::TaskComplete => "TASK_COMPLETE",
            EventType::TaskFailed => "TASK_FAILED",
        }
    }

    /// `TASK_COMPLETE` and `TASK_FAILED` end a task's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::TaskComplete | EventType::TaskFailed)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TrendvisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TrendvisorError::Validation(format!("unknown event type '{s}'")))
    }
}

/// Typed event payload. Each variant fixes the fields its event type carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// A new task was created.
    TaskCreated {
        /// Task identifier.
        task_id: String,
        /// Goal (product name) to collect data for.
        goal: String,
    },
    /// Collection finished; data is ready for analysis.
    CollectionComplete {
        /// Task identifier.
        task_id: String,
        /// Location of the collected data.
        data_path: String,
    },
    /// Analysis finished; the task succeeded.
    TaskComplete {
        /// Task identifier.
        task_id: String,
        /// Location of the generated report.
        report_path: String,
    },
    /// A stage failed; the task is over.
    TaskFailed {
        /// Task identifier.
        task_id: String,
        /// Failure diagnostic.
        error: String,
    },
}

#[derive(Serialize, Deserialize)]
struct TaskCreatedFields {
    task_id: String,
    #[serde(alias = "product_name")]
    goal: String,
}

#[derive(Serialize, Deserialize)]
struct CollectionCompleteFields {
    task_id: String,
    data_path: String,
}

#[derive(Serialize, Deserialize)]
struct TaskCompleteFields {
    task_id: String,
    report_path: String,
}

#[derive(Serialize, Deserialize)]
struct TaskFailedFields {
    task_id: String,
    error: String,
}

fn decode_fields<T: DeserializeOwned>(
    event_type: EventType,
    value: serde_json::Value,
) -> TrendvisorResult<T> {
    serde_json::from_value(value).map_err(|e| {
        TrendvisorError::Validation(format!("invalid {event_type} payload: {e}"))
    })
}

fn require(event_type: EventType, field: &str, value: &str) -> TrendvisorResult<()> {
    if value.trim().is_empty() {
        return Err(TrendvisorError::Validation(format!(
            "{event_type} payload has an empty '{field}'"
        )));
    }
    Ok(())
}

impl EventPayload {
    /// The event type this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TaskCreated { .. } => EventType::TaskCreated,
            EventPayload::CollectionComplete { .. } => EventType::CollectionComplete,
            EventPayload::TaskComplete { .. } => EventType::TaskComplete,
            EventPayload::TaskFailed { .. } => EventType::TaskFailed,
        }
    }

    /// Every payload carries the id of the task it concerns.
    pub fn task_id(&self) -> &str {
        match self {
            EventPayload::TaskCreated { task_id, .. }
            | EventPayload::CollectionComplete { task_id, .. }
            | EventPayload::TaskComplete { task_id, .. }
            | EventPayload::TaskFailed { task_id, .. } => task_id,
        }
    }

    /// Encodes the payload as the JSON object sent on the wire.
    pub fn to_value(&self) -> TrendvisorResult<serde_json::Value> {
        let value = match self.clone() {
            EventPayload::TaskCreated { task_id, goal } => {
                serde_json::to_value(TaskCreatedFields { task_id, goal })?
            }
            EventPayload::CollectionComplete { task_id, data_path } => {
                serde_json::to_value(CollectionCompleteFields { task_id, data_path })?
            }
            EventPayload::TaskComplete {
                task_id,
                report_path,
            } => serde_json::to_value(TaskCompleteFields {
                task_id,
                report_path,
            })?,
            EventPayload::TaskFailed { task_id, error } => {
                serde_json::to_value(TaskFailedFields { task_id, error })?
            }
        };
        Ok(value)
    }

    /// Decodes a wire payload, checking that the fields required by
    /// `event_type` are present and non-empty.
    pub fn from_value(event_type: EventType, value: serde_json::Value) -> TrendvisorResult<Self> {
        let payload = match event_type {
            EventType::TaskCreated => {
                let f: TaskCreatedFields = decode_fields(event_type, value)?;
                require(event_type, "goal", &f.goal)?;
                EventPayload::TaskCreated {
                    task_id: f.task_id,
                    goal: f.goal,
                }
            }
            EventType::CollectionComplete => {
                let f: CollectionCompleteFields = decode_fields(event_type, value)?;
                require(event_type, "data_path", &f.data_path)?;
                EventPayload::CollectionComplete {
                    task_id: f.task_id,
                    data_path: f.data_path,
                }
            }
            EventType::TaskComplete => {
                let f: TaskCompleteFields = decode_fields(event_type, value)?;
                require(event_type, "report_path", &f.report_path)?;
                EventPayload::TaskComplete {
                    task_id: f.task_id,
                    report_path: f.report_path,
                }
            }
            EventType::TaskFailed => {
                let f: TaskFailedFields = decode_fields(event_type, value)?;
                EventPayload::TaskFailed {
                    task_id: f.task_id,
                    error: f.error,
                }
            }
        };
        require(event_type, "task_id", payload.task_id())?;
        Ok(payload)
    }
}

/// Wire form of an [`Event`], with the payload still undecoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID.
    pub event_id: String,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// Declared event type; selects the payload shape.
    pub event_type: EventType,
    /// Publishing agent.
    pub source_agent: String,
    /// Raw payload object.
    pub payload: serde_json::Value,
}

/// An immutable, timestamped notification broadcast on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventEnvelope", into = "EventEnvelope")]
pub struct Event {
    /// Unique event ID.
    pub event_id: String,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// Agent that published the event.
    pub source_agent: String,
    /// Typed payload; determines the event type.
    pub payload: EventPayload,
}

impl Event {
    /// Wraps a payload in a fresh envelope.
    pub fn new(source_agent: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_agent: source_agent.into(),
            payload,
        }
    }

    /// The event type, derived from the payload variant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// The task this event concerns.
    pub fn task_id(&self) -> &str {
        self.payload.task_id()
    }

    /// Serializes the envelope to its JSON wire form.
    pub fn to_json(&self) -> TrendvisorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses and validates a JSON wire message.
    pub fn from_json(raw: &str) -> TrendvisorResult<Self> {
        let envelope: EventEnvelope = serde_json::from_str(raw)
            .map_err(|e| TrendvisorError::Validation(format!("undecodable event: {e}")))?;
        Event::try_from(envelope)
    }
}

impl TryFrom<EventEnvelope> for Event {
    type Error = TrendvisorError;

    fn try_from(envelope: EventEnvelope) -> Result<Self, Self::Error> {
        let payload = EventPayload::from_value(envelope.event_type, envelope.payload)?;
        Ok(Self {
            event_id: envelope.event_id,
            timestamp: envelope.timestamp,
            source_agent: envelope.source_agent,
            payload,
        })
    }
}

impl From<Event> for EventEnvelope {
    fn from(event: Event) -> Self {
        let event_type = event.event_type();
        // Encoding the fixed-shape field structs cannot fail.
        let payload = event.payload.to_value().unwrap_or(serde_json::Value::Null);
        Self {
            event_id: event.event_id,
            timestamp: event.timestamp,
            event_type,
            source_agent: event.source_agent,
            payload,
        }
    }
}
