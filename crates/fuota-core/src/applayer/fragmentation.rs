// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote fragmentation session reconciliation.
//!
//! [`FragmentationSyncWorker`] re-dispatches `FragSessionSetupReq` /
//! `FragSessionDeleteReq` until the device acknowledges or the per-row
//! retry budget is exhausted; acknowledgements arrive through
//! [`handle_remote_fragmentation_session_command`].

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use tokio::sync::Notify;
use tracing::{error, info};

use fuota_applayer::fragmentation::{
    self, Command, FragSessionDeleteAnsPayload, FragSessionDeleteReqPayload,
    FragSessionSetupAnsPayload, FragSessionSetupReqPayload,
};
use fuota_applayer::types::Eui64;

use crate::backend::NetworkServerClient;
use crate::config::SyncConfig;
use crate::storage::{self, RemoteFragmentationSession, RemoteSyncState};

/// Periodic worker dispatching fragmentation session setup / delete
/// requests.
pub struct FragmentationSyncWorker {
    pool: PgPool,
    backend: Arc<dyn NetworkServerClient>,
    config: SyncConfig,
    shutdown: Arc<Notify>,
}

impl FragmentationSyncWorker {
    /// Create a new fragmentation sync worker.
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
            "Fragmentation-session sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Fragmentation-session sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %format!("{e:#}"), "Sync remote fragmentation session error");
                    }
                }
            }
        }

        info!("Fragmentation-session sync worker stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sync_remote_fragmentation_sessions(&mut tx, self.backend.as_ref(), &self.config).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Dispatches one batch of pending fragmentation session rows.
pub async fn sync_remote_fragmentation_sessions(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &SyncConfig,
) -> anyhow::Result<()> {
    let items = storage::get_pending_remote_fragmentation_sessions(
        &mut *conn,
        config.batch_size,
        config.max_retries,
    )
    .await?;

    for item in items {
        sync_remote_fragmentation_session_item(&mut *conn, backend, config, item)
            .await
            .context("sync remote fragmentation session error")?;
    }

    Ok(())
}

async fn sync_remote_fragmentation_session_item(
    conn: &mut PgConnection,
    backend: &dyn NetworkServerClient,
    config: &SyncConfig,
    mut item: RemoteFragmentationSession,
) -> anyhow::Result<()> {
    let cmd = match item.state {
        RemoteSyncState::Setup => {
            let mut mask = [false; 4];
            for idx in &item.mc_group_ids {
                if (0..=3).contains(idx) {
                    mask[*idx as usize] = true;
                }
            }

            Command::FragSessionSetupReq(FragSessionSetupReqPayload {
                frag_index: item.frag_index as u8,
                mc_group_bit_mask: mask,
                nb_frag: item.nb_frag as u16,
                frag_size: item.frag_size as u8,
                fragmentation_matrix: item.fragmentation_matrix as u8,
                block_ack_delay: item.block_ack_delay as u8,
                padding: item.padding as u8,
                descriptor: item.descriptor,
            })
        }
        RemoteSyncState::Delete => Command::FragSessionDeleteReq(FragSessionDeleteReqPayload {
            frag_index: item.frag_index as u8,
        }),
    };

    let b = cmd.to_bytes().context("encode command error")?;

    backend
        .enqueue_downlink_payload(item.dev_eui, false, fragmentation::DEFAULT_FPORT, b)
        .await
        .context("enqueue downlink payload error")?;

    item.retry_count += 1;
    item.retry_after = Utc::now() + config.interval;

    storage::update_remote_fragmentation_session(conn, &mut item)
        .await
        .context("update remote fragmentation session error")?;

    Ok(())
}

/// Handles an uplink fragmentation session command.
pub async fn handle_remote_fragmentation_session_command(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    b: &[u8],
) -> anyhow::Result<()> {
    let cmd = Command::from_bytes(true, b).context("decode command error")?;

    match cmd {
        Command::FragSessionSetupAns(pl) => handle_frag_session_setup_ans(conn, dev_eui, pl)
            .await
            .context("handle FragSessionSetupAns error"),
        Command::FragSessionDeleteAns(pl) => handle_frag_session_delete_ans(conn, dev_eui, pl)
            .await
            .context("handle FragSessionDeleteAns error"),
        other => bail!("CID not implemented: {:#04x}", other.cid()),
    }
}

async fn handle_frag_session_setup_ans(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    pl: FragSessionSetupAnsPayload,
) -> anyhow::Result<()> {
    if pl.wrong_descriptor
        || pl.frag_session_index_not_supported
        || pl.not_enough_memory
        || pl.encoding_unsupported
    {
        bail!(
            "WrongDescriptor: {}, FragSessionIndexNotSupported: {}, NotEnoughMemory: {}, EncodingUnsupported: {}",
            pl.wrong_descriptor,
            pl.frag_session_index_not_supported,
            pl.not_enough_memory,
            pl.encoding_unsupported
        );
    }

    let mut rfs =
        storage::get_remote_fragmentation_session(&mut *conn, dev_eui, pl.frag_index as i16, true)
            .await
            .context("get remote fragmentation session error")?;

    rfs.state_provisioned = true;
    storage::update_remote_fragmentation_session(conn, &mut rfs)
        .await
        .context("update remote fragmentation session error")?;

    Ok(())
}

async fn handle_frag_session_delete_ans(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    pl: FragSessionDeleteAnsPayload,
) -> anyhow::Result<()> {
    if pl.session_does_not_exist {
        bail!("FragIndex {} does not exist", pl.frag_index);
    }

    let mut rfs =
        storage::get_remote_fragmentation_session(&mut *conn, dev_eui, pl.frag_index as i16, true)
            .await
            .context("get remote fragmentation session error")?;

    rfs.state_provisioned = true;
    storage::update_remote_fragmentation_session(conn, &mut rfs)
        .await
        .context("update remote fragmentation session error")?;

    Ok(())
}
