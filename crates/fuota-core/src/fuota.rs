// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FUOTA deployment driver.
//!
//! The driver walks every deployment through its stages, one transition per
//! tick and transaction:
//!
//! ```text
//! MC_SETUP -> FRAG_SESS_SETUP -> MC_SESS_C_SETUP -> ENQUEUE -> WAITING_TX
//! ```
//!
//! Each stage fans provisioning rows out to the participating devices and
//! then waits `retries x unicast_timeout` before the next stage filters on
//! the devices whose rows were acknowledged in the meantime. A stage that
//! matches no devices still advances, so an empty deployment simply walks
//! to WAITING_TX.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tokio::sync::Notify;
use tracing::{error, info};

use fuota_applayer::fragmentation::{
    self, Command, DataFragmentPayload,
};
use fuota_applayer::multicastsetup::{
    encrypt_mc_key, mc_ke_key, mc_root_key_for_app_key, mc_root_key_for_gen_app_key,
};

use crate::backend::NetworkServerClient;
use crate::multicast;
use crate::storage::{
    self, FuotaDeployment, FuotaDeploymentState, RemoteFragmentationSession,
    RemoteMulticastClassCSession, RemoteMulticastSetup, RemoteSyncState,
};

/// Configuration for the deployment driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentWorkerConfig {
    /// Driver tick interval.
    pub interval: Duration,
    /// Deployments advanced per tick.
    pub batch_size: i64,
    /// Multicast group slot provisioned on each device (0..=3).
    pub mc_group_id: i16,
    /// Fragmentation session index installed on each device (0..=3).
    pub frag_index: i16,
    /// Dispatch budget assumed for the multicast setup and Class-C stages.
    pub multicast_setup_retries: i32,
    /// Dispatch budget assumed for the fragmentation session stage.
    pub fragmentation_session_retries: i32,
}

impl Default for DeploymentWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 1,
            mc_group_id: 0,
            frag_index: 0,
            multicast_setup_retries: 3,
            fragmentation_session_retries: 3,
        }
    }
}

/// Periodic worker advancing pending deployments.
pub struct DeploymentWorker {
    pool: PgPool,
    backend: Arc<dyn NetworkServerClient>,
    config: DeploymentWorkerConfig,
    shutdown: Arc<Notify>,
}

impl DeploymentWorker {
    /// Create a new deployment driver worker.
    pub fn new(
        pool: PgPool,
        backend: Arc<dyn NetworkServerClient>,
        config: DeploymentWorkerConfig,
    ) -> Self {
        Self {
            pool,
            backend,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the driver loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "FUOTA deployment worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("FUOTA deployment worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %format!("{e:#}"), "FUOTA deployment error");
                    }
                }
            }
        }

        info!("FUOTA deployment worker stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        process_pending_deployments(&mut tx, self.backend.as_ref(), &self.config).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Advances every pending deployment in the batch by one stage.
pub async fn process_pending_deployments(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &DeploymentWorkerConfig,
) -> anyhow::Result<()> {
    let items = storage::get_pending_fuota_deployments(&mut *conn, config.batch_size).await?;

    for item in items {
        handle_deployment(&mut *conn, backend, config, item)
            .await
            .context("fuota deployment error")?;
    }

    Ok(())
}

async fn handle_deployment(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &DeploymentWorkerConfig,
    item: FuotaDeployment,
) -> anyhow::Result<()> {
    match item.state {
        FuotaDeploymentState::MulticastSetup => step_multicast_setup(conn, config, item).await,
        FuotaDeploymentState::FragmentationSessSetup => {
            step_fragmentation_sess_setup(conn, config, item).await
        }
        FuotaDeploymentState::MulticastSessCSetup => {
            step_multicast_sess_c_setup(conn, config, item).await
        }
        FuotaDeploymentState::Enqueue => step_enqueue(conn, backend, config, item).await,
        other => bail!("unexpected state: {}", other),
    }
}

fn multicast_group_id(item: &FuotaDeployment) -> anyhow::Result<uuid::Uuid> {
    item.multicast_group_id
        .ok_or_else(|| anyhow!("no multicast-group attached to deployment"))
}

async fn step_multicast_setup(
    conn: &mut PgConnection,
    config: &DeploymentWorkerConfig,
    mut item: FuotaDeployment,
) -> anyhow::Result<()> {
    let group_id = multicast_group_id(&item)?;

    let mg = storage::get_multicast_group(&mut *conn, group_id, false)
        .await
        .context("get multicast group error")?;

    let device_keys = storage::get_device_keys_for_fuota_deployment(&mut *conn, item.id)
        .await
        .context("get device-keys for fuota deployment error")?;

    for dk in device_keys {
        // A non-zero AppKey means a LoRaWAN 1.1 device.
        let mc_root_key = if !dk.app_key.is_zero() {
            mc_root_key_for_app_key(&dk.app_key)
        } else {
            mc_root_key_for_gen_app_key(&dk.gen_app_key)
        };
        let kek = mc_ke_key(&mc_root_key);

        let mut rms = RemoteMulticastSetup {
            dev_eui: dk.dev_eui,
            multicast_group_id: group_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            mc_group_id: config.mc_group_id,
            mc_addr: mg.mc_addr,
            mc_key_encrypted: encrypt_mc_key(&kek, &mg.mc_key),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: (1 << 32) - 1,
            state: RemoteSyncState::Setup,
            state_provisioned: false,
            retry_after: Utc::now(),
            retry_count: 0,
            retry_interval_secs: item.unicast_timeout_secs,
        };

        storage::create_remote_multicast_setup(&mut *conn, &mut rms)
            .await
            .context("create remote multicast setup error")?;
    }

    item.state = FuotaDeploymentState::FragmentationSessSetup;
    item.next_step_after = Utc::now()
        + chrono::Duration::seconds(
            config.multicast_setup_retries as i64 * item.unicast_timeout_secs,
        );

    storage::update_fuota_deployment(conn, &mut item)
        .await
        .context("update fuota deployment error")?;

    Ok(())
}

async fn step_fragmentation_sess_setup(
    conn: &mut PgConnection,
    config: &DeploymentWorkerConfig,
    mut item: FuotaDeployment,
) -> anyhow::Result<()> {
    if item.frag_size == 0 {
        bail!("FragSize must not be 0");
    }
    let group_id = multicast_group_id(&item)?;

    let dev_euis = storage::get_dev_euis_with_multicast_setup(&mut *conn, group_id)
        .await
        .context("get devices with multicast setup error")?;

    let frag_size = item.frag_size as usize;
    let padding = item.payload.len() % frag_size;
    let nb_frag = (item.payload.len() + padding) / frag_size + item.redundancy as usize;

    for dev_eui in dev_euis {
        // A session from a previous deployment may still occupy the index.
        match storage::delete_remote_fragmentation_session(&mut *conn, dev_eui, config.frag_index)
            .await
        {
            Ok(()) | Err(crate::error::Error::DoesNotExist) => {}
            Err(e) => {
                return Err(
                    anyhow::Error::new(e).context("delete remote fragmentation session error")
                )
            }
        }

        let mut rfs = RemoteFragmentationSession {
            dev_eui,
            frag_index: config.frag_index,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            mc_group_ids: vec![config.mc_group_id],
            nb_frag: nb_frag as i32,
            frag_size: item.frag_size,
            fragmentation_matrix: item.fragmentation_matrix,
            block_ack_delay: item.block_ack_delay,
            padding: padding as i32,
            descriptor: item.descriptor,
            state: RemoteSyncState::Setup,
            state_provisioned: false,
            retry_after: Utc::now(),
            retry_count: 0,
            retry_interval_secs: item.unicast_timeout_secs,
        };

        storage::create_remote_fragmentation_session(&mut *conn, &mut rfs)
            .await
            .context("create remote fragmentation session error")?;
    }

    item.state = FuotaDeploymentState::MulticastSessCSetup;
    item.next_step_after = Utc::now()
        + chrono::Duration::seconds(
            config.fragmentation_session_retries as i64 * item.unicast_timeout_secs,
        );

    storage::update_fuota_deployment(conn, &mut item)
        .await
        .context("update fuota deployment error")?;

    Ok(())
}

async fn step_multicast_sess_c_setup(
    conn: &mut PgConnection,
    config: &DeploymentWorkerConfig,
    mut item: FuotaDeployment,
) -> anyhow::Result<()> {
    let group_id = multicast_group_id(&item)?;

    let mg = storage::get_multicast_group(&mut *conn, group_id, false)
        .await
        .context("get multicast group error")?;

    let dev_euis =
        storage::get_dev_euis_with_fragmentation_session(&mut *conn, group_id, config.frag_index)
            .await
            .context("get devices with fragmentation session setup error")?;

    for dev_eui in dev_euis {
        let mut sess = RemoteMulticastClassCSession {
            dev_eui,
            multicast_group_id: group_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            mc_group_id: config.mc_group_id,
            dl_frequency: mg.frequency,
            dr: mg.dr,
            session_time: Utc::now()
                + chrono::Duration::seconds(
                    config.multicast_setup_retries as i64 * item.unicast_timeout_secs,
                ),
            session_time_out: item.multicast_timeout,
            state_provisioned: false,
            retry_after: Utc::now(),
            retry_count: 0,
            retry_interval_secs: item.unicast_timeout_secs,
        };

        storage::create_remote_multicast_class_c_session(&mut *conn, &mut sess)
            .await
            .context("create remote multicast class-c session error")?;
    }

    item.state = FuotaDeploymentState::Enqueue;
    item.next_step_after = Utc::now()
        + chrono::Duration::seconds(
            config.multicast_setup_retries as i64 * item.unicast_timeout_secs,
        );

    storage::update_fuota_deployment(conn, &mut item)
        .await
        .context("update fuota deployment error")?;

    Ok(())
}

async fn step_enqueue(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &DeploymentWorkerConfig,
    mut item: FuotaDeployment,
) -> anyhow::Result<()> {
    let group_id = multicast_group_id(&item)?;

    let fragments = fragmentation::encode(
        &item.payload,
        item.frag_size as usize,
        item.redundancy as usize,
    )
    .context("fragment payload error")?;

    let mut payloads = Vec::with_capacity(fragments.len());
    for (i, fragment) in fragments.into_iter().enumerate() {
        let cmd = Command::DataFragment(DataFragmentPayload {
            frag_index: config.frag_index as u8,
            n: i as u16,
            payload: fragment,
        });
        payloads.push(cmd.to_bytes().context("encode command error")?);
    }

    multicast::enqueue_multiple(
        &mut *conn,
        backend,
        group_id,
        fragmentation::DEFAULT_FPORT,
        payloads,
    )
    .await
    .context("enqueue multiple error")?;

    item.state = FuotaDeploymentState::WaitingTx;
    item.next_step_after = Utc::now() + config.interval;

    storage::update_fuota_deployment(conn, &mut item)
        .await
        .context("update fuota deployment error")?;

    Ok(())
}
