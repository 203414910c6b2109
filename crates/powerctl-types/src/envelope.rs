use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generic outbox event envelope shared by every event type this service
/// emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: String,
    pub source: String,
    pub ts_utc: DateTime<Utc>,
    pub correlation_id: String,
    pub subject: String,
    pub topic: String,
    pub event_type: String,
    pub data_content_type: String,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(
        event_id: String,
        source: impl Into<String>,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: T,
    ) -> Self {
        Self {
            event_id,
            source: source.into(),
            ts_utc: Utc::now(),
            correlation_id: correlation_id.into(),
            subject: subject.into(),
            topic: topic.into(),
            event_type: event_type.into(),
            data_content_type: "application/json".to_string(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLifecyclePayload {
    #[serde(rename = "transitionId")]
    pub transition_id: String,
    pub snapshot: crate::Transition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultPayload {
    #[serde(rename = "transitionId")]
    pub transition_id: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub snapshot: crate::Task,
}

pub const TOPIC_TRANSITIONS_LIFECYCLE: &str = "transitions.lifecycle";
pub const TOPIC_TRANSITIONS_TASK_RESULT: &str = "transitions.task-result";
