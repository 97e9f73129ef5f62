// Copyright (c) 2025 - Cowboy AI, Inc.
//! Patient Domain Events
//!
//! This module defines the facts the patient service publishes and the
//! binary codec every producer and consumer shares.
//!
//! # Event Principles
//!
//! 1. **Events are immutable**: Once published, events never change
//! 2. **Events follow the commit**: Published only after the record is durable
//! 3. **Events are keyed**: `subject_id` orders events per patient and keys idempotency
//! 4. **Events are versioned**: `schema_version` on the wire, optional-field decoding
//!
//! # Event Flow
//!
//! ```text
//! Patient commit → DomainEvent → encode → Broker → decode → Provisioner
//!                                  (bytes)  (per-key order)   (exactly-once effect)
//! ```
//!
//! # Module Organization
//!
//! - [`patient`] - Event, subject id and validation rules
//! - [`codec`] - Protobuf wire codec

pub mod codec;
pub mod patient;

// Re-export commonly used types
pub use codec::{decode, encode, DecodeError, PatientEventMessage, SCHEMA_VERSION};
pub use patient::{
    Attributes, DomainEvent, EventType, SubjectId, ValidationError, EMAIL_ATTRIBUTE,
    NAME_ATTRIBUTE,
};
