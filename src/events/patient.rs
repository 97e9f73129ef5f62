// Copyright (c) 2025 - Cowboy AI, Inc.
//! Patient lifecycle events
//!
//! A [`DomainEvent`] is created once, right after the patient service commits
//! the underlying record, and never changes afterwards. Its [`SubjectId`] is
//! both the partition key on the broker and the idempotency key for every
//! downstream effect that is "one record per patient".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Attribute carrying the patient's display name
pub const NAME_ATTRIBUTE: &str = "name";

/// Attribute carrying the patient's email address
pub const EMAIL_ATTRIBUTE: &str = "email";

/// Business-rule violations on an otherwise decodable event
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Subject id is empty")]
    EmptySubjectId,

    #[error("Subject id exceeds maximum length of {max} characters: {len}")]
    SubjectIdTooLong { len: usize, max: usize },

    #[error("Invalid character in subject id: {0:?}")]
    InvalidSubjectCharacter(char),

    #[error("Required attribute missing: {0}")]
    MissingAttribute(&'static str),

    #[error("Malformed email address: {0}")]
    MalformedEmail(String),
}

/// Stable identifier of the patient an event is about
///
/// Invariants:
/// - Non-empty
/// - At most [`SubjectId::MAX_LENGTH`] characters
/// - No whitespace or control characters
///
/// Values read off the wire are wrapped without checks so that a bad id can be
/// reported as a business-rule violation instead of a decode failure; call
/// [`DomainEvent::validate`] before acting on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Maximum length of a subject id
    pub const MAX_LENGTH: usize = 128;

    /// Create a validated subject id
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    /// Wrap a value received from a producer without validating it
    pub(crate) fn from_wire(id: String) -> Self {
        Self(id)
    }

    /// Check the subject id invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            return Err(ValidationError::EmptySubjectId);
        }

        let len = self.0.chars().count();
        if len > Self::MAX_LENGTH {
            return Err(ValidationError::SubjectIdTooLong {
                len,
                max: Self::MAX_LENGTH,
            });
        }

        if let Some(bad) = self
            .0
            .chars()
            .find(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ValidationError::InvalidSubjectCharacter(bad));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of lifecycle change an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    /// Name written on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventType::Created => "PATIENT_CREATED",
            EventType::Updated => "PATIENT_UPDATED",
            EventType::Deleted => "PATIENT_DELETED",
        }
    }

    /// Parse a wire name; empty means a legacy producer and maps to `Created`
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "" | "CREATED" | "PATIENT_CREATED" => Some(EventType::Created),
            "UPDATED" | "PATIENT_UPDATED" => Some(EventType::Updated),
            "DELETED" | "PATIENT_DELETED" => Some(EventType::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Created => write!(f, "created"),
            EventType::Updated => write!(f, "updated"),
            EventType::Deleted => write!(f, "deleted"),
        }
    }
}

/// Named string attributes of the patient (name, email, ...)
pub type Attributes = BTreeMap<String, String>;

/// Patient lifecycle fact, as published on the `patient` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub subject_id: SubjectId,
    pub attributes: Attributes,
    pub produced_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Create an event with the two attributes every consumer requires
    pub fn new(
        event_type: EventType,
        subject_id: SubjectId,
        name: impl Into<String>,
        email: impl Into<String>,
        produced_at: DateTime<Utc>,
    ) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(NAME_ATTRIBUTE.to_string(), name.into());
        attributes.insert(EMAIL_ATTRIBUTE.to_string(), email.into());

        Self {
            event_type,
            subject_id,
            attributes,
            produced_at,
        }
    }

    /// `Created` event stamped with the current time
    pub fn created(subject_id: SubjectId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(EventType::Created, subject_id, name, email, Utc::now())
    }

    /// Add an optional attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.attribute(NAME_ATTRIBUTE)
    }

    pub fn email(&self) -> Option<&str> {
        self.attribute(EMAIL_ATTRIBUTE)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Check the business rules consumers rely on
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.subject_id.validate()?;

        match self.name() {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingAttribute(NAME_ATTRIBUTE)),
        }

        let email = match self.email() {
            Some(email) if !email.is_empty() => email,
            _ => return Err(ValidationError::MissingAttribute(EMAIL_ATTRIBUTE)),
        };

        match email.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {}
            _ => return Err(ValidationError::MalformedEmail(email.to_string())),
        }

        Ok(())
    }
}
