// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recording network-server client for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use fuota_applayer::types::Eui64;

use super::{MulticastQueueItem, NetworkServerClient, VersionInfo};
use crate::band::Region;

/// A unicast downlink request as received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkPayloadRequest {
    /// Target device.
    pub dev_eui: Eui64,
    /// Whether a confirmed downlink was requested.
    pub confirmed: bool,
    /// Application port.
    pub f_port: u8,
    /// Serialised command bytes.
    pub frm_payload: Vec<u8>,
}

/// Network-server client that records every request.
#[derive(Debug)]
pub struct MockNetworkServerClient {
    version: VersionInfo,
    downlink_payloads: Mutex<Vec<DownlinkPayloadRequest>>,
    multicast_queue: Mutex<Vec<MulticastQueueItem>>,
}

impl MockNetworkServerClient {
    /// Create a mock reporting the EU868 region.
    pub fn new() -> Self {
        Self::with_region(Region::Eu868)
    }

    /// Create a mock reporting the given region.
    pub fn with_region(region: Region) -> Self {
        Self {
            version: VersionInfo { region },
            downlink_payloads: Mutex::new(Vec::new()),
            multicast_queue: Mutex::new(Vec::new()),
        }
    }

    /// Takes all recorded unicast downlink requests.
    pub fn drain_downlink_payloads(&self) -> Vec<DownlinkPayloadRequest> {
        std::mem::take(&mut *self.downlink_payloads.lock().unwrap())
    }

    /// Takes all recorded multicast queue items.
    pub fn drain_multicast_queue(&self) -> Vec<MulticastQueueItem> {
        std::mem::take(&mut *self.multicast_queue.lock().unwrap())
    }
}

impl Default for MockNetworkServerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkServerClient for MockNetworkServerClient {
    async fn get_version(&self) -> anyhow::Result<VersionInfo> {
        Ok(self.version)
    }

    async fn enqueue_downlink_payload(
        &self,
        dev_eui: Eui64,
        confirmed: bool,
        f_port: u8,
        frm_payload: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.downlink_payloads
            .lock()
            .unwrap()
            .push(DownlinkPayloadRequest {
                dev_eui,
                confirmed,
                f_port,
                frm_payload,
            });
        Ok(())
    }

    async fn enqueue_multicast_queue_item(&self, item: MulticastQueueItem) -> anyhow::Result<()> {
        self.multicast_queue.lock().unwrap().push(item);
        Ok(())
    }
}
