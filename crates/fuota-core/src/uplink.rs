// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Uplink command routing.

use anyhow::bail;
use chrono::Duration;
use sqlx::PgConnection;

use fuota_applayer::types::Eui64;
use fuota_applayer::{clocksync, fragmentation, multicastsetup};

use crate::applayer;
use crate::backend::NetworkServerClient;

/// Routes an inbound application-layer command to its protocol handler
/// based on the well-known fPort.
///
/// The handlers either fully mark a provisioning row as acknowledged or
/// return an error without side effects; protocol errors reported by the
/// device surface here as errors too.
pub async fn handle_uplink_command(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    dev_eui: Eui64,
    time_since_gps_epoch: Duration,
    f_port: u8,
    data: &[u8],
) -> anyhow::Result<()> {
    match f_port {
        multicastsetup::DEFAULT_FPORT => {
            applayer::multicastsetup::handle_remote_multicast_setup_command(conn, dev_eui, data)
                .await
        }
        fragmentation::DEFAULT_FPORT => {
            applayer::fragmentation::handle_remote_fragmentation_session_command(
                conn, dev_eui, data,
            )
            .await
        }
        clocksync::DEFAULT_FPORT => {
            applayer::clocksync::handle_clock_sync_command(
                backend,
                dev_eui,
                time_since_gps_epoch,
                data,
            )
            .await
        }
        _ => bail!("no handler for fPort: {}", f_port),
    }
}
