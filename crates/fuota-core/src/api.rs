// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admin-facing deployment creation.
//!
//! The embedding application owns the transport (gRPC, HTTP) and the
//! authorisation of the caller; this module implements the core operation
//! behind it.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use fuota_applayer::fragmentation::Descriptor;
use fuota_applayer::types::Eui64;

use crate::backend::NetworkServerClient;
use crate::band;
use crate::error::{Error, Result};
use crate::storage::{self, FuotaDeployment, FuotaDeploymentState, GroupType};

/// Request to create a FUOTA deployment for a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFuotaDeploymentRequest {
    /// Display name.
    pub name: String,
    /// Multicast group type; only `CLASS_C` is accepted.
    pub group_type: String,
    /// Downlink data-rate index.
    pub dr: u8,
    /// Downlink frequency in Hz.
    pub frequency: u32,
    /// Firmware payload.
    pub payload: Vec<u8>,
    /// Number of redundancy fragments.
    pub redundancy: u32,
    /// Class-C session timeout exponent.
    pub multicast_timeout: u8,
    /// Per-device unicast provisioning timeout, seconds.
    pub unicast_timeout_secs: u64,
}

/// Creates a deployment for the given DevEUI and returns its id.
///
/// The fragment size is derived from the regional band table as the
/// maximum application payload size for the requested data-rate minus the
/// three bytes of DataFragment framing.
pub async fn create_for_dev_eui(
    pool: &PgPool,
    backend: &dyn NetworkServerClient,
    dev_eui: &str,
    req: CreateFuotaDeploymentRequest,
) -> Result<Uuid> {
    let dev_eui: Eui64 = dev_eui
        .parse()
        .map_err(|e| Error::Validation(format!("dev_eui: {e}")))?;

    let group_type = match req.group_type.as_str() {
        "CLASS_C" => GroupType::ClassC,
        other => return Err(Error::UnsupportedGroupType(other.to_string())),
    };

    let version = backend.get_version().await.map_err(Error::Backend)?;
    let max_pl_size = band::max_payload_size(version.region, req.dr)?;

    let mut fd = FuotaDeployment {
        id: Uuid::nil(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        name: req.name,
        multicast_group_id: None,
        group_type,
        dr: req.dr as i16,
        frequency: req.frequency as i64,
        payload: req.payload,
        frag_size: max_pl_size.n as i32 - 3,
        redundancy: req.redundancy as i32,
        fragmentation_matrix: 0,
        block_ack_delay: 0,
        descriptor: Descriptor::default(),
        multicast_timeout: req.multicast_timeout as i16,
        unicast_timeout_secs: req.unicast_timeout_secs as i64,
        state: FuotaDeploymentState::MulticastSetup,
        next_step_after: chrono::Utc::now(),
    };

    let mut tx = pool.begin().await?;
    storage::create_fuota_deployment_for_device(&mut tx, &mut fd, dev_eui).await?;
    tx.commit().await?;

    Ok(fd.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockNetworkServerClient;
    use crate::band::Region;

    fn request() -> CreateFuotaDeploymentRequest {
        CreateFuotaDeploymentRequest {
            name: "test-deployment".into(),
            group_type: "CLASS_C".into(),
            dr: 5,
            frequency: 868_100_000,
            payload: vec![1, 2, 3],
            redundancy: 5,
            multicast_timeout: 8,
            unicast_timeout_secs: 60,
        }
    }

    // Validation happens before any database access, so a lazy pool that
    // never connects is enough for the error paths.
    fn dummy_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/dummy").unwrap()
    }

    #[tokio::test]
    async fn test_invalid_dev_eui() {
        let backend = MockNetworkServerClient::new();
        let err = create_for_dev_eui(&dummy_pool(), &backend, "not-a-eui", request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_unsupported_group_type() {
        let backend = MockNetworkServerClient::new();
        let mut req = request();
        req.group_type = "CLASS_B".into();

        let err = create_for_dev_eui(&dummy_pool(), &backend, "0102030405060708", req)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedGroupType(t) if t == "CLASS_B"));
    }

    #[tokio::test]
    async fn test_unsupported_region() {
        let backend = MockNetworkServerClient::with_region(Region::Us915);
        let err = create_for_dev_eui(&dummy_pool(), &backend, "0102030405060708", request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRegion(Region::Us915)));
    }
}
