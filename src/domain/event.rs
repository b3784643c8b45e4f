//! Domain event (outbox record) model

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of domain event recorded by the identity service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Registration,
    Login,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Login => "login",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status. Only `pending` is ever written; a dispatcher owns the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Pending,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
        }
    }
}

/// JSON document stored as the event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub email: String,
    pub action: EventType,
    pub timestamp: String,
}

impl EventPayload {
    pub fn new(email: impl Into<String>, action: EventType, at: DateTime<Utc>) -> Self {
        Self {
            email: email.into(),
            action,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Event about to be appended to the outbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Identity the event concerns, when known at write time
    pub aggregate_id: Option<Uuid>,
    pub event_type: EventType,
    /// Opaque to the core once written
    pub payload: Vec<u8>,
    pub status: EventStatus,
}

impl NewEvent {
    /// Build a pending event whose payload is the JSON encoding of `payload`.
    pub fn from_payload(
        aggregate_id: Option<Uuid>,
        payload: &EventPayload,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            event_type: payload.action,
            payload: serde_json::to_vec(payload)?,
            status: EventStatus::Pending,
        })
    }

    pub fn with_aggregate(mut self, aggregate_id: Uuid) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }
}
