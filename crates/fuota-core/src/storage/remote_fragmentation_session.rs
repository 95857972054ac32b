// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-device remote fragmentation session records.

use chrono::{DateTime, Utc};
use fuota_applayer::fragmentation::Descriptor;
use fuota_applayer::types::Eui64;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::RemoteSyncState;

/// Provisioning state of one fragmentation session on one device.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RemoteFragmentationSession {
    /// Device identifier.
    pub dev_eui: Eui64,
    /// Session index on the device, 0..=3.
    pub frag_index: i16,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Multicast group slots the session listens to.
    pub mc_group_ids: Vec<i16>,
    /// Total number of fragments, data plus redundancy.
    pub nb_frag: i32,
    /// Fragment size in bytes.
    pub frag_size: i32,
    /// Erasure-code matrix selector.
    pub fragmentation_matrix: i16,
    /// Block acknowledgement delay exponent.
    pub block_ack_delay: i16,
    /// Zero bytes appended to the last data fragment.
    pub padding: i32,
    /// Opaque file descriptor.
    pub descriptor: Descriptor,
    /// Whether the session must be set up or deleted.
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
    dev_eui, frag_index, created_at, updated_at, mc_group_ids, nb_frag,
    frag_size, fragmentation_matrix, block_ack_delay, padding, descriptor,
    state, state_provisioned, retry_after, retry_count, retry_interval_secs
"#;

/// Create a remote fragmentation session record; it is pending immediately.
pub async fn create_remote_fragmentation_session(
    conn: &mut PgConnection,
    rfs: &mut RemoteFragmentationSession,
) -> Result<()> {
    let now = Utc::now();
    rfs.created_at = now;
    rfs.updated_at = now;
    rfs.retry_after = now;

    sqlx::query(
        r#"
        insert into remote_fragmentation_session (
            dev_eui, frag_index, created_at, updated_at, mc_group_ids,
            nb_frag, frag_size, fragmentation_matrix, block_ack_delay,
            padding, descriptor, state, state_provisioned, retry_after,
            retry_count, retry_interval_secs
        ) values ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $3, $13, $14)
        "#,
    )
    .bind(rfs.dev_eui)
    .bind(rfs.frag_index)
    .bind(now)
    .bind(&rfs.mc_group_ids)
    .bind(rfs.nb_frag)
    .bind(rfs.frag_size)
    .bind(rfs.fragmentation_matrix)
    .bind(rfs.block_ack_delay)
    .bind(rfs.padding)
    .bind(rfs.descriptor)
    .bind(rfs.state)
    .bind(rfs.state_provisioned)
    .bind(rfs.retry_count)
    .bind(rfs.retry_interval_secs)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a record by device and session index.
pub async fn get_remote_fragmentation_session(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    frag_index: i16,
    for_update: bool,
) -> Result<RemoteFragmentationSession> {
    let mut query = format!(
        "select {COLUMNS} from remote_fragmentation_session where dev_eui = $1 and frag_index = $2"
    );
    if for_update {
        query.push_str(" for update");
    }

    sqlx::query_as::<_, RemoteFragmentationSession>(&query)
        .bind(dev_eui)
        .bind(frag_index)
        .fetch_optional(conn)
        .await?
        .ok_or(Error::DoesNotExist)
}

/// Get records awaiting a dispatch, locking them and skipping rows a
/// concurrent reconciler already holds.
pub async fn get_pending_remote_fragmentation_sessions(
    conn: &mut PgConnection,
    limit: i64,
    max_retries: i32,
) -> Result<Vec<RemoteFragmentationSession>> {
    let records = sqlx::query_as::<_, RemoteFragmentationSession>(&format!(
        r#"
        select {COLUMNS}
        from remote_fragmentation_session
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
pub async fn update_remote_fragmentation_session(
    conn: &mut PgConnection,
    rfs: &mut RemoteFragmentationSession,
) -> Result<()> {
    rfs.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        update remote_fragmentation_session
        set
            updated_at = $3,
            mc_group_ids = $4,
            nb_frag = $5,
            frag_size = $6,
            fragmentation_matrix = $7,
            block_ack_delay = $8,
            padding = $9,
            descriptor = $10,
            state = $11,
            state_provisioned = $12,
            retry_after = $13,
            retry_count = $14,
            retry_interval_secs = $15
        where dev_eui = $1 and frag_index = $2
        "#,
    )
    .bind(rfs.dev_eui)
    .bind(rfs.frag_index)
    .bind(rfs.updated_at)
    .bind(&rfs.mc_group_ids)
    .bind(rfs.nb_frag)
    .bind(rfs.frag_size)
    .bind(rfs.fragmentation_matrix)
    .bind(rfs.block_ack_delay)
    .bind(rfs.padding)
    .bind(rfs.descriptor)
    .bind(rfs.state)
    .bind(rfs.state_provisioned)
    .bind(rfs.retry_after)
    .bind(rfs.retry_count)
    .bind(rfs.retry_interval_secs)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}

/// Delete a record.
pub async fn delete_remote_fragmentation_session(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    frag_index: i16,
) -> Result<()> {
    let result = sqlx::query(
        "delete from remote_fragmentation_session where dev_eui = $1 and frag_index = $2",
    )
    .bind(dev_eui)
    .bind(frag_index)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}

/// Devices of a group whose fragmentation session is in place.
///
/// Note: the filter constrains the multicast-setup provisioning flag twice
/// and never the session's own flag, matching the behaviour this engine
/// replicates; effectively this selects devices whose multicast setup is
/// provisioned and that have a session row in SETUP.
pub async fn get_dev_euis_with_fragmentation_session(
    conn: &mut PgConnection,
    multicast_group_id: Uuid,
    frag_index: i16,
) -> Result<Vec<Eui64>> {
    let records = sqlx::query_scalar::<_, Eui64>(
        r#"
        select
            rms.dev_eui
        from
            remote_multicast_setup rms
        inner join
            remote_fragmentation_session rfs
        on
            rfs.dev_eui = rms.dev_eui
            and rfs.frag_index = $1
        where
            rms.multicast_group_id = $2
            and rms.state = $3
            and rms.state_provisioned = $4
            and rfs.state = $3
            and rms.state_provisioned = $4
        "#,
    )
    .bind(frag_index)
    .bind(multicast_group_id)
    .bind(RemoteSyncState::Setup)
    .bind(true)
    .fetch_all(conn)
    .await?;

    Ok(records)
}
