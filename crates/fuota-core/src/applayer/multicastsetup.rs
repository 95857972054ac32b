// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote multicast setup reconciliation.
//!
//! Two workers live here: [`SetupSyncWorker`] drives `McGroupSetupReq` /
//! `McGroupDeleteReq` dispatches, [`ClassCSessionSyncWorker`] drives
//! `McClassCSessionReq` dispatches. Both re-send until the device
//! acknowledges or the per-row retry budget is exhausted; acknowledgements
//! arrive through [`handle_remote_multicast_setup_command`].

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tokio::sync::Notify;
use tracing::{error, info};

use fuota_applayer::gps;
use fuota_applayer::multicastsetup::{
    self, Command, McClassCSessionAnsPayload, McClassCSessionReqPayload, McGroupDeleteReqPayload,
    McGroupSetupAnsPayload, McGroupSetupReqPayload,
};
use fuota_applayer::types::Eui64;

use crate::backend::NetworkServerClient;
use crate::config::SyncConfig;
use crate::storage::{self, RemoteMulticastClassCSession, RemoteMulticastSetup, RemoteSyncState};

/// Periodic worker dispatching multicast group setup / delete requests.
pub struct SetupSyncWorker {
    pool: PgPool,
    backend: Arc<dyn NetworkServerClient>,
    config: SyncConfig,
    shutdown: Arc<Notify>,
}

impl SetupSyncWorker {
    /// Create a new setup sync worker.
    pub fn new(pool: PgPool, backend: Arc<dyn NetworkServerClient>, config: SyncConfig) -> Self {
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

    /// Run the sync loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Multicast-setup sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Multicast-setup sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %format!("{e:#}"), "Sync remote multicast setup error");
                    }
                }
            }
        }

        info!("Multicast-setup sync worker stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sync_remote_multicast_setup(&mut tx, self.backend.as_ref(), &self.config).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Periodic worker dispatching Class-C session requests.
pub struct ClassCSessionSyncWorker {
    pool: PgPool,
    backend: Arc<dyn NetworkServerClient>,
    config: SyncConfig,
    shutdown: Arc<Notify>,
}

impl ClassCSessionSyncWorker {
    /// Create a new Class-C session sync worker.
    pub fn new(pool: PgPool, backend: Arc<dyn NetworkServerClient>, config: SyncConfig) -> Self {
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

    /// Run the sync loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Class-C session sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Class-C session sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %format!("{e:#}"), "Sync remote multicast class-c session error");
                    }
                }
            }
        }

        info!("Class-C session sync worker stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sync_remote_multicast_class_c_sessions(&mut tx, self.backend.as_ref(), &self.config)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Dispatches one batch of pending multicast setup rows.
pub async fn sync_remote_multicast_setup(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &SyncConfig,
) -> anyhow::Result<()> {
    let items = storage::get_pending_remote_multicast_setup_items(
        &mut *conn,
        config.batch_size,
        config.max_retries,
    )
    .await?;

    for item in items {
        sync_remote_multicast_setup_item(&mut *conn, backend, config, item)
            .await
            .context("sync remote multicast-setup error")?;
    }

    Ok(())
}

async fn sync_remote_multicast_setup_item(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &SyncConfig,
    mut item: RemoteMulticastSetup,
) -> anyhow::Result<()> {
    let cmd = match item.state {
        RemoteSyncState::Setup => Command::McGroupSetupReq(McGroupSetupReqPayload {
            mc_group_id: item.mc_group_id as u8,
            mc_addr: item.mc_addr,
            mc_key_encrypted: item.mc_key_encrypted,
            min_mc_f_cnt: item.min_mc_f_cnt as u32,
            max_mc_f_cnt: item.max_mc_f_cnt as u32,
        }),
        RemoteSyncState::Delete => Command::McGroupDeleteReq(McGroupDeleteReqPayload {
            mc_group_id: item.mc_group_id as u8,
        }),
    };

    let b = cmd.to_bytes().context("encode command error")?;

    backend
        .enqueue_downlink_payload(item.dev_eui, false, multicastsetup::DEFAULT_FPORT, b)
        .await
        .context("enqueue downlink payload error")?;

    item.retry_count += 1;
    item.retry_after = Utc::now() + config.interval;

    storage::update_remote_multicast_setup(conn, &mut item)
        .await
        .context("update remote multicast-setup error")?;

    Ok(())
}

/// Dispatches one batch of pending Class-C session rows.
pub async fn sync_remote_multicast_class_c_sessions(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &SyncConfig,
) -> anyhow::Result<()> {
    let items = storage::get_pending_remote_multicast_class_c_sessions(
        &mut *conn,
        config.batch_size,
        config.max_retries,
    )
    .await?;

    for item in items {
        sync_remote_multicast_class_c_session_item(&mut *conn, backend, config, item)
            .await
            .context("sync remote multicast class-c session error")?;
    }

    Ok(())
}

async fn sync_remote_multicast_class_c_session_item(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &SyncConfig,
    mut item: RemoteMulticastClassCSession,
) -> anyhow::Result<()> {
    // SessionTime is stored as wall-clock and leaves as GPS seconds mod 2^32.
    let session_time =
        (gps::time_since_gps_epoch(item.session_time).num_seconds() % (1 << 32)) as u32;

    let cmd = Command::McClassCSessionReq(McClassCSessionReqPayload {
        mc_group_id: item.mc_group_id as u8,
        session_time,
        session_time_out: item.session_time_out as u8,
        dl_frequency: item.dl_frequency as u32,
        dr: item.dr as u8,
    });

    let b = cmd.to_bytes().context("encode command error")?;

    backend
        .enqueue_downlink_payload(item.dev_eui, false, multicastsetup::DEFAULT_FPORT, b)
        .await
        .context("enqueue downlink payload error")?;

    item.retry_count += 1;
    item.retry_after = Utc::now() + config.interval;

    storage::update_remote_multicast_class_c_session(conn, &mut item)
        .await
        .context("update remote multicast class-c session error")?;

    Ok(())
}

/// Handles an uplink remote multicast setup command.
pub async fn handle_remote_multicast_setup_command(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    b: &[u8],
) -> anyhow::Result<()> {
    let cmd = Command::from_bytes(true, b).context("decode command error")?;

    match cmd {
        Command::McGroupSetupAns(pl) => handle_mc_group_setup_ans(conn, dev_eui, pl)
            .await
            .context("handle McGroupSetupAns error"),
        Command::McClassCSessionAns(pl) => handle_mc_class_c_session_ans(conn, dev_eui, pl)
            .await
            .context("handle McClassCSessionAns error"),
        other => bail!("CID not implemented: {:#04x}", other.cid()),
    }
}

async fn handle_mc_group_setup_ans(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    pl: McGroupSetupAnsPayload,
) -> anyhow::Result<()> {
    if pl.id_error {
        bail!("IDError for McGroupID: {}", pl.mc_group_id);
    }

    let mut rms = storage::get_remote_multicast_setup_by_group_id(
        &mut *conn,
        dev_eui,
        pl.mc_group_id as i16,
        true,
    )
    .await
    .context("get remote multicast-setup by group id error")?;

    rms.state_provisioned = true;
    storage::update_remote_multicast_setup(conn, &mut rms)
        .await
        .context("update remote multicast-setup error")?;

    Ok(())
}

async fn handle_mc_class_c_session_ans(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    pl: McClassCSessionAnsPayload,
) -> anyhow::Result<()> {
    if pl.dr_error || pl.freq_error || pl.mc_group_undefined {
        bail!(
            "DRError: {}, FreqError: {}, McGroupUndefined: {} for McGroupID: {}",
            pl.dr_error,
            pl.freq_error,
            pl.mc_group_undefined,
            pl.mc_group_id
        );
    }

    let mut sess = storage::get_remote_multicast_class_c_session_by_group_id(
        &mut *conn,
        dev_eui,
        pl.mc_group_id as i16,
        true,
    )
    .await
    .context("get remote multicast class-c session error")?;

    sess.state_provisioned = true;
    storage::update_remote_multicast_class_c_session(conn, &mut sess)
        .await
        .context("update remote multicast class-c session error")?;

    Ok(())
}
