// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! - [`codec_roundtrip`] - wire codec and partition routing
//! - [`idempotence`] - provisioning under duplicated, reordered deliveries

mod codec_roundtrip;
mod idempotence;
