// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LoRaWAN application-layer protocol support for FUOTA.
//!
//! This crate implements the wire formats and cryptographic primitives that a
//! firmware-update-over-the-air deployment needs on the application server
//! side:
//!
//! | Module | Protocol | fPort |
//! |--------|----------|-------|
//! | [`clocksync`] | Application Layer Clock Synchronization | 202 |
//! | [`fragmentation`] | Fragmented Data Block Transport | 201 |
//! | [`multicastsetup`] | Remote Multicast Setup | 200 |
//!
//! Each protocol module exposes a [`clocksync::Command`]-style tagged enum
//! with a single typed decoder, so dispatch sites match on the variant and a
//! variant mismatch cannot occur past decoding.
//!
//! Supporting modules:
//!
//! - [`types`]: `Eui64`, `DevAddr` and `Aes128Key` primitives with hex text
//!   forms and BYTEA database mappings.
//! - [`crypto`]: FRMPayload encryption (the AES-CTR construction from the
//!   LoRaWAN link-layer specification).
//! - [`gps`]: wall-clock to GPS-epoch conversion, including the leap-second
//!   insertion table.
//!
//! Key derivation for the multicast setup protocol (McRootKey, McKEKey)
//! lives in [`multicastsetup`] next to the commands that carry the derived
//! material.

pub mod clocksync;
pub mod crypto;
pub mod fragmentation;
pub mod gps;
pub mod multicastsetup;
pub mod types;

use thiserror::Error;

/// Errors that can occur while encoding or decoding application-layer
/// commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The command identifier is not known for the given direction.
    #[error("CID not implemented: {0:#04x}")]
    UnknownCid(u8),

    /// The payload is shorter than the fixed layout requires.
    #[error("payload too short: expected at least {expected} bytes, got {got}")]
    PayloadTooShort {
        /// Minimum number of bytes the layout requires.
        expected: usize,
        /// Number of bytes that were available.
        got: usize,
    },

    /// A bit-packed field was given a value outside its range.
    #[error("{field} out of range: max {max}, got {got}")]
    FieldOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Largest encodable value.
        max: u32,
        /// Value that was supplied.
        got: u32,
    },

    /// The fragmentation encoder was asked for zero-sized fragments.
    #[error("frag size must be at least 1")]
    ZeroFragSize,
}
