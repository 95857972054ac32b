// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-device remote multicast setup records.

use chrono::{DateTime, Utc};
use fuota_applayer::types::{Aes128Key, DevAddr, Eui64};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::RemoteSyncState;

/// Provisioning state of one multicast group slot on one device.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RemoteMulticastSetup {
    /// Device identifier.
    pub dev_eui: Eui64,
    /// Multicast group being provisioned.
    pub multicast_group_id: Uuid,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Hardware group slot on the device, 0..=3.
    pub mc_group_id: i16,
    /// Multicast network address.
    pub mc_addr: DevAddr,
    /// Group key wrapped under the per-device McKEKey.
    pub mc_key_encrypted: Aes128Key,
    /// Lowest accepted multicast frame counter.
    pub min_mc_f_cnt: i64,
    /// Highest accepted multicast frame counter.
    pub max_mc_f_cnt: i64,
    /// Whether the slot must be set up or deleted.
    pub state: RemoteSyncState,
    /// Set once the device acknowledged the request.
    pub state_provisioned: bool,
    /// Earliest time of the next dispatch.
    pub retry_after: DateTime<Utc>,
    /// Number of dispatches so far.
    pub retry_count: i32,
    /// Interval added to `retry_after` on each dispatch, seconds.
    pub retry_interval_secs: i64,
}

const COLUMNS: &str = r#"
    dev_eui, multicast_group_id, created_at, updated_at, mc_group_id,
    mc_addr, mc_key_encrypted, min_mc_f_cnt, max_mc_f_cnt, state,
    state_provisioned, retry_after, retry_count, retry_interval_secs
"#;

/// Create a remote multicast setup record; it is pending immediately.
pub async fn create_remote_multicast_setup(
    conn: &mut PgConnection,
    rms: &mut RemoteMulticastSetup,
) -> Result<()> {
    let now = Utc::now();
    rms.created_at = now;
    rms.updated_at = now;
    rms.retry_after = now;

    sqlx::query(
        r#"
        insert into remote_multicast_setup (
            dev_eui, multicast_group_id, created_at, updated_at, mc_group_id,
            mc_addr, mc_key_encrypted, min_mc_f_cnt, max_mc_f_cnt, state,
            state_provisioned, retry_after, retry_count, retry_interval_secs
        ) values ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9, $10, $3, $11, $12)
        "#,
    )
    .bind(rms.dev_eui)
    .bind(rms.multicast_group_id)
    .bind(now)
    .bind(rms.mc_group_id)
    .bind(rms.mc_addr)
    .bind(rms.mc_key_encrypted)
    .bind(rms.min_mc_f_cnt)
    .bind(rms.max_mc_f_cnt)
    .bind(rms.state)
    .bind(rms.state_provisioned)
    .bind(rms.retry_count)
    .bind(rms.retry_interval_secs)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a record by device and multicast group.
pub async fn get_remote_multicast_setup(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    multicast_group_id: Uuid,
    for_update: bool,
) -> Result<RemoteMulticastSetup> {
    let mut query = format!(
        "select {COLUMNS} from remote_multicast_setup where dev_eui = $1 and multicast_group_id = $2"
    );
    if for_update {
        query.push_str(" for update");
    }

    sqlx::query_as::<_, RemoteMulticastSetup>(&query)
        .bind(dev_eui)
        .bind(multicast_group_id)
        .fetch_optional(conn)
        .await?
        .ok_or(Error::DoesNotExist)
}

/// Get a record by device and hardware group slot, as answers address it.
pub async fn get_remote_multicast_setup_by_group_id(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    mc_group_id: i16,
    for_update: bool,
) -> Result<RemoteMulticastSetup> {
    let mut query = format!(
        "select {COLUMNS} from remote_multicast_setup where dev_eui = $1 and mc_group_id = $2"
    );
    if for_update {
        query.push_str(" for update");
    }

    sqlx::query_as::<_, RemoteMulticastSetup>(&query)
        .bind(dev_eui)
        .bind(mc_group_id)
        .fetch_optional(conn)
        .await?
        .ok_or(Error::DoesNotExist)
}

/// Get records awaiting a dispatch, locking them and skipping rows a
/// concurrent reconciler already holds.
pub async fn get_pending_remote_multicast_setup_items(
    conn: &mut PgConnection,
    limit: i64,
    max_retries: i32,
) -> Result<Vec<RemoteMulticastSetup>> {
    let records = sqlx::query_as::<_, RemoteMulticastSetup>(&format!(
        r#"
        select {COLUMNS}
        from remote_multicast_setup
        where
            state_provisioned = false
            and retry_after <= now()
            and retry_count < $1
        limit $2
        for update
        skip locked
        "#
    ))
    .bind(max_retries)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(records)
}

/// Persist a record after a dispatch or acknowledgement.
pub async fn update_remote_multicast_setup(
    conn: &mut PgConnection,
    rms: &mut RemoteMulticastSetup,
) -> Result<()> {
    rms.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        update remote_multicast_setup
        set
            updated_at = $3,
            mc_group_id = $4,
            mc_addr = $5,
            mc_key_encrypted = $6,
            min_mc_f_cnt = $7,
            max_mc_f_cnt = $8,
            state = $9,
            state_provisioned = $10,
            retry_after = $11,
            retry_count = $12,
            retry_interval_secs = $13
        where dev_eui = $1 and multicast_group_id = $2
        "#,
    )
    .bind(rms.dev_eui)
    .bind(rms.multicast_group_id)
    .bind(rms.updated_at)
    .bind(rms.mc_group_id)
    .bind(rms.mc_addr)
    .bind(rms.mc_key_encrypted)
    .bind(rms.min_mc_f_cnt)
    .bind(rms.max_mc_f_cnt)
    .bind(rms.state)
    .bind(rms.state_provisioned)
    .bind(rms.retry_after)
    .bind(rms.retry_count)
    .bind(rms.retry_interval_secs)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}

/// Delete a record.
pub async fn delete_remote_multicast_setup(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    multicast_group_id: Uuid,
) -> Result<()> {
    let result = sqlx::query(
        "delete from remote_multicast_setup where dev_eui = $1 and multicast_group_id = $2",
    )
    .bind(dev_eui)
    .bind(multicast_group_id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}

/// Devices of a group whose multicast setup completed provisioning.
pub async fn get_dev_euis_with_multicast_setup(
    conn: &mut PgConnection,
    multicast_group_id: Uuid,
) -> Result<Vec<Eui64>> {
    let records = sqlx::query_scalar::<_, Eui64>(
        r#"
        select
            dev_eui
        from
            remote_multicast_setup
        where
            multicast_group_id = $1
            and state = $2
            and state_provisioned = $3
        "#,
    )
    .bind(multicast_group_id)
    .bind(RemoteSyncState::Setup)
    .bind(true)
    .fetch_all(conn)
    .await?;

    Ok(records)
}
