// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the Wire Codec
//!
//! Every valid event survives encoding, arbitrary bytes never panic the
//! decoder, and a key always routes to the same partition.

use chrono::{DateTime, Utc};
use pms_pipeline::events::{codec, DomainEvent, EventType, SubjectId};
use pms_pipeline::subjects::partition_for;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn event_type() -> impl Strategy<Value = EventType> {
    prop_oneof![
        Just(EventType::Created),
        Just(EventType::Updated),
        Just(EventType::Deleted),
    ]
}

fn subject_id() -> impl Strategy<Value = SubjectId> {
    "[a-zA-Z0-9_.:-]{1,64}".prop_map(|id| SubjectId::new(id).unwrap())
}

fn produced_at() -> impl Strategy<Value = DateTime<Utc>> {
    // 1970..2100, nanosecond precision
    (0i64..4_102_444_800, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
}

fn domain_event() -> impl Strategy<Value = DomainEvent> {
    (
        event_type(),
        subject_id(),
        "[A-Za-z][A-Za-z ]{0,30}",
        "[a-z]{1,10}@[a-z]{1,10}\\.[a-z]{2,3}",
        produced_at(),
        prop::collection::btree_map("[a-z_]{1,12}", ".{0,20}", 0..4),
    )
        .prop_map(|(kind, id, name, email, at, extra)| {
            extra.into_iter().fold(
                DomainEvent::new(kind, id, name, email, at),
                |event, (key, value)| {
                    if key == "name" || key == "email" {
                        event
                    } else {
                        event.with_attribute(key, value)
                    }
                },
            )
        })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Property: Decoding an encoded event yields the same event
    #[test]
    fn prop_decode_inverts_encode(event in domain_event()) {
        let decoded = codec::decode(&codec::encode(&event)).unwrap();

        prop_assert_eq!(decoded, event);
    }

    /// Property: Encoded events pass the consumer-side business rules
    #[test]
    fn prop_decoded_events_validate(event in domain_event()) {
        let decoded = codec::decode(&codec::encode(&event)).unwrap();

        prop_assert!(decoded.validate().is_ok());
    }

    /// Property: The decoder rejects garbage without panicking
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode(&bytes);
    }

    /// Property: Truncating a payload never yields a different valid event
    #[test]
    fn prop_truncation_detected(event in domain_event(), cut in 1usize..64) {
        let encoded = codec::encode(&event);
        let len = encoded.len().saturating_sub(cut);

        if let Ok(decoded) = codec::decode(&encoded[..len]) {
            // Only possible when the cut removed trailing optional fields
            prop_assert_eq!(&decoded.subject_id, &event.subject_id);
        }
    }

    /// Property: Partition routing is stable and in range
    #[test]
    fn prop_partition_stable_and_bounded(key in ".{0,64}", partitions in 1u32..64) {
        let first = partition_for(&key, partitions);
        let second = partition_for(&key, partitions);

        prop_assert_eq!(first, second);
        prop_assert!(first < partitions);
    }

    /// Property: Whitespace never appears in a valid subject id
    #[test]
    fn prop_whitespace_subject_rejected(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
        let id = format!("{prefix} {suffix}");

        prop_assert!(SubjectId::new(id).is_err());
    }
}
