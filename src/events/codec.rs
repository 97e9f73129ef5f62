// Copyright (c) 2025 - Cowboy AI, Inc.
//! Binary wire codec for patient events
//!
//! Events travel as a protobuf message. Decoding is deliberately lenient about
//! what it does not know and strict about what consumers need:
//!
//! - Unknown fields are skipped, so newer producers never break older consumers
//! - `patient_id`, `name` and `email` must be present and non-empty
//! - An empty `event_type` comes from legacy producers and means `CREATED`
//! - A missing `produced_at` comes from legacy producers and decodes as the Unix epoch
//!
//! ```text
//! DomainEvent ──encode──> PatientEventMessage ──prost──> bytes
//! bytes ──prost──> PatientEventMessage ──decode──> DomainEvent | DecodeError
//! ```

use chrono::{DateTime, Utc};
use prost::Message;
use prost_types::Timestamp;
use std::collections::HashMap;
use thiserror::Error;

use super::patient::{
    Attributes, DomainEvent, EventType, SubjectId, EMAIL_ATTRIBUTE, NAME_ATTRIBUTE,
};

/// Schema version written by this producer
pub const SCHEMA_VERSION: u32 = 2;

/// Errors raised while decoding a payload
///
/// A payload that fails to decode can never be processed; consumers drop it
/// instead of retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed event payload: {0}")]
    Malformed(String),

    #[error("Required field missing: {0}")]
    MissingField(&'static str),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid produced_at timestamp: {seconds}s {nanos}ns")]
    InvalidTimestamp { seconds: i64, nanos: i32 },
}

impl From<prost::DecodeError> for DecodeError {
    fn from(err: prost::DecodeError) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

/// Protobuf representation of a patient event
#[derive(Clone, PartialEq, Message)]
pub struct PatientEventMessage {
    #[prost(string, tag = "1")]
    pub patient_id: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(string, tag = "3")]
    pub email: String,

    #[prost(string, tag = "4")]
    pub event_type: String,

    #[prost(message, optional, tag = "5")]
    pub produced_at: Option<Timestamp>,

    /// Named attributes beyond name and email
    #[prost(map = "string, string", tag = "6")]
    pub attributes: HashMap<String, String>,

    #[prost(uint32, tag = "7")]
    pub schema_version: u32,
}

impl From<&DomainEvent> for PatientEventMessage {
    fn from(event: &DomainEvent) -> Self {
        let attributes = event
            .attributes
            .iter()
            .filter(|(name, _)| name.as_str() != NAME_ATTRIBUTE && name.as_str() != EMAIL_ATTRIBUTE)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            patient_id: event.subject_id.as_str().to_string(),
            name: event.name().unwrap_or_default().to_string(),
            email: event.email().unwrap_or_default().to_string(),
            event_type: event.event_type.wire_name().to_string(),
            produced_at: Some(datetime_to_timestamp(event.produced_at)),
            attributes,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl TryFrom<PatientEventMessage> for DomainEvent {
    type Error = DecodeError;

    fn try_from(message: PatientEventMessage) -> Result<Self, Self::Error> {
        if message.patient_id.is_empty() {
            return Err(DecodeError::MissingField("patient_id"));
        }
        if message.name.is_empty() {
            return Err(DecodeError::MissingField(NAME_ATTRIBUTE));
        }
        if message.email.is_empty() {
            return Err(DecodeError::MissingField(EMAIL_ATTRIBUTE));
        }

        let event_type = EventType::from_wire(&message.event_type)
            .ok_or_else(|| DecodeError::UnknownEventType(message.event_type.clone()))?;

        let produced_at = match message.produced_at {
            Some(ts) => timestamp_to_datetime(ts)?,
            None => DateTime::UNIX_EPOCH,
        };

        let mut attributes: Attributes = message.attributes.into_iter().collect();
        attributes.insert(NAME_ATTRIBUTE.to_string(), message.name);
        attributes.insert(EMAIL_ATTRIBUTE.to_string(), message.email);

        Ok(DomainEvent {
            event_type,
            subject_id: SubjectId::from_wire(message.patient_id),
            attributes,
            produced_at,
        })
    }
}

/// Encode an event to its wire bytes
pub fn encode(event: &DomainEvent) -> Vec<u8> {
    PatientEventMessage::from(event).encode_to_vec()
}

/// Decode wire bytes into an event
pub fn decode(bytes: &[u8]) -> Result<DomainEvent, DecodeError> {
    let message = PatientEventMessage::decode(bytes)?;
    DomainEvent::try_from(message)
}

/// Convert a `DateTime<Utc>` to a protobuf `Timestamp`.
pub fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

/// Convert a protobuf `Timestamp` to a `DateTime<Utc>`.
pub fn timestamp_to_datetime(ts: Timestamp) -> Result<DateTime<Utc>, DecodeError> {
    let invalid = DecodeError::InvalidTimestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
    };

    let nanos = u32::try_from(ts.nanos).map_err(|_| invalid.clone())?;
    DateTime::from_timestamp(ts.seconds, nanos).ok_or(invalid)
}
