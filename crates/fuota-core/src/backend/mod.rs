// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Network-server collaborator interface.
//!
//! The engine never talks to a network server directly; the embedding
//! application provides an implementation of [`NetworkServerClient`] backed
//! by its RPC stack. [`mock::MockNetworkServerClient`] records requests for
//! tests.

pub mod mock;

use async_trait::async_trait;
use fuota_applayer::types::Eui64;
use uuid::Uuid;

use crate::band::Region;

/// Version information reported by the network server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Region the network server serves.
    pub region: Region,
}

/// One item for a multicast-group downlink queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastQueueItem {
    /// Target multicast group.
    pub multicast_group_id: Uuid,
    /// Encrypted application payload.
    pub frm_payload: Vec<u8>,
    /// Frame counter the payload was encrypted under.
    pub f_cnt: u32,
    /// Application port.
    pub f_port: u8,
}

/// Operations the engine requires from the network server.
#[async_trait]
pub trait NetworkServerClient: Send + Sync {
    /// Returns the server version information, including its region.
    async fn get_version(&self) -> anyhow::Result<VersionInfo>;

    /// Queues a unicast downlink payload for a device.
    async fn enqueue_downlink_payload(
        &self,
        dev_eui: Eui64,
        confirmed: bool,
        f_port: u8,
        frm_payload: Vec<u8>,
    ) -> anyhow::Result<()>;

    /// Queues one item on a multicast-group queue.
    async fn enqueue_multicast_queue_item(&self, item: MulticastQueueItem) -> anyhow::Result<()>;
}
