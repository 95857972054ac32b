// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application-layer protocol drivers.
//!
//! Each submodule owns one device-facing protocol: the periodic sync worker
//! that re-dispatches provisioning requests until the device acknowledges
//! (or the retry budget runs out), and the uplink handlers that process the
//! acknowledgements.

pub mod clocksync;
pub mod fragmentation;
pub mod multicastsetup;
