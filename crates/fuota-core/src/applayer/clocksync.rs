// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Clock synchronization handling.

use anyhow::{bail, Context};
use chrono::Duration;

use fuota_applayer::clocksync::{self, AppTimeAnsPayload, AppTimeReqPayload, Command};
use fuota_applayer::types::Eui64;

use crate::backend::NetworkServerClient;

/// Handles an uplink clock synchronization command.
///
/// `time_since_gps_epoch` is the network-side GPS time at which the uplink
/// was received.
pub async fn handle_clock_sync_command(
    backend: &dyn NetworkServerClient,
    dev_eui: Eui64,
    time_since_gps_epoch: Duration,
    b: &[u8],
) -> anyhow::Result<()> {
    let cmd = Command::from_bytes(true, b).context("decode command error")?;

    match cmd {
        Command::AppTimeReq(pl) => {
            handle_app_time_req(backend, dev_eui, time_since_gps_epoch, pl)
                .await
                .context("handle AppTimeReq error")
        }
        other => bail!("CID not implemented: {:#04x}", other.cid()),
    }
}

async fn handle_app_time_req(
    backend: &dyn NetworkServerClient,
    dev_eui: Eui64,
    time_since_gps_epoch: Duration,
    pl: AppTimeReqPayload,
) -> anyhow::Result<()> {
    let device_gps_time = pl.device_time as i64;
    let network_gps_time = time_since_gps_epoch.num_seconds() % (1 << 32);

    let ans = Command::AppTimeAns(AppTimeAnsPayload {
        time_correction: (network_gps_time - device_gps_time) as i32,
        token_ans: pl.token_req,
    });
    let b = ans.to_bytes().context("encode command error")?;

    backend
        .enqueue_downlink_payload(dev_eui, false, clocksync::DEFAULT_FPORT, b)
        .await
        .context("enqueue downlink payload error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockNetworkServerClient;
    use fuota_applayer::clocksync::AppTimeReqPayload;

    #[tokio::test]
    async fn test_app_time_req_answer() {
        let backend = MockNetworkServerClient::new();
        let dev_eui = Eui64([1, 2, 3, 4, 5, 6, 7, 8]);

        let req = Command::AppTimeReq(AppTimeReqPayload {
            device_time: 1000,
            token_req: 9,
            ans_required: false,
        });
        let b = req.to_bytes().unwrap();

        handle_clock_sync_command(&backend, dev_eui, Duration::seconds(1262), &b)
            .await
            .unwrap();

        let requests = backend.drain_downlink_payloads();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].dev_eui, dev_eui);
        assert!(!requests[0].confirmed);
        assert_eq!(requests[0].f_port, clocksync::DEFAULT_FPORT);

        let ans = Command::from_bytes(false, &requests[0].frm_payload).unwrap();
        assert_eq!(
            ans,
            Command::AppTimeAns(AppTimeAnsPayload {
                time_correction: 262,
                token_ans: 9,
            })
        );
    }

    #[tokio::test]
    async fn test_negative_correction() {
        let backend = MockNetworkServerClient::new();
        let dev_eui = Eui64([1, 2, 3, 4, 5, 6, 7, 8]);

        let req = Command::AppTimeReq(AppTimeReqPayload {
            device_time: 5000,
            token_req: 0,
            ans_required: true,
        });
        let b = req.to_bytes().unwrap();

        handle_clock_sync_command(&backend, dev_eui, Duration::seconds(4980), &b)
            .await
            .unwrap();

        let requests = backend.drain_downlink_payloads();
        let ans = Command::from_bytes(false, &requests[0].frm_payload).unwrap();
        assert_eq!(
            ans,
            Command::AppTimeAns(AppTimeAnsPayload {
                time_correction: -20,
                token_ans: 0,
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_cid_is_rejected() {
        let backend = MockNetworkServerClient::new();
        let dev_eui = Eui64::default();

        let err = handle_clock_sync_command(&backend, dev_eui, Duration::zero(), &[0x55, 0x00])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("CID not implemented"));
        assert!(backend.drain_downlink_payloads().is_empty());
    }
}
