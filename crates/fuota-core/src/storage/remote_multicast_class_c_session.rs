// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-device Class-C session schedule records.

use chrono::{DateTime, Utc};
use fuota_applayer::types::Eui64;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Scheduled Class-C reception window for one device.
///
/// The session time is stored as wall-clock UTC; conversion to GPS-epoch
/// seconds happens when the request is serialised.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RemoteMulticastClassCSession {
    /// Device identifier.
    pub dev_eui: Eui64,
    /// Multicast group the window is scheduled for.
    pub multicast_group_id: Uuid,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Hardware group slot on the device, 0..=3.
    pub mc_group_id: i16,
    /// Downlink frequency in Hz.
    pub dl_frequency: i64,
    /// Downlink data-rate index.
    pub dr: i16,
    /// Window start, wall-clock UTC.
    pub session_time: DateTime<Utc>,
    /// Window length exponent: the session stays open 2^timeout seconds.
    pub session_time_out: i16,
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
    dl_frequency, dr, session_time, session_time_out, state_provisioned,
    retry_after, retry_count, retry_interval_secs
"#;

/// Create a Class-C session record; it is pending immediately.
pub async fn create_remote_multicast_class_c_session(
    conn: &mut PgConnection,
    sess: &mut RemoteMulticastClassCSession,
) -> Result<()> {
    let now = Utc::now();
    sess.created_at = now;
    sess.updated_at = now;
    sess.retry_after = now;

    sqlx::query(
        r#"
        insert into remote_multicast_class_c_session (
            dev_eui, multicast_group_id, created_at, updated_at, mc_group_id,
            dl_frequency, dr, session_time, session_time_out,
            state_provisioned, retry_after, retry_count, retry_interval_secs
        ) values ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9, $3, $10, $11)
        "#,
    )
    .bind(sess.dev_eui)
    .bind(sess.multicast_group_id)
    .bind(now)
    .bind(sess.mc_group_id)
    .bind(sess.dl_frequency)
    .bind(sess.dr)
    .bind(sess.session_time)
    .bind(sess.session_time_out)
    .bind(sess.state_provisioned)
    .bind(sess.retry_count)
    .bind(sess.retry_interval_secs)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a record by device and hardware group slot, as answers address it.
pub async fn get_remote_multicast_class_c_session_by_group_id(
    conn: &mut PgConnection,
    dev_eui: Eui64,
    mc_group_id: i16,
    for_update: bool,
) -> Result<RemoteMulticastClassCSession> {
    let mut query = format!(
        "select {COLUMNS} from remote_multicast_class_c_session where dev_eui = $1 and mc_group_id = $2"
    );
    if for_update {
        query.push_str(" for update");
    }

    sqlx::query_as::<_, RemoteMulticastClassCSession>(&query)
        .bind(dev_eui)
        .bind(mc_group_id)
        .fetch_optional(conn)
        .await?
        .ok_or(Error::DoesNotExist)
}

/// Get records awaiting a dispatch, locking them and skipping rows a
/// concurrent reconciler already holds.
pub async fn get_pending_remote_multicast_class_c_sessions(
    conn: &mut PgConnection,
    limit: i64,
    max_retries: i32,
) -> Result<Vec<RemoteMulticastClassCSession>> {
    let records = sqlx::query_as::<_, RemoteMulticastClassCSession>(&format!(
        r#"
        select {COLUMNS}
        from remote_multicast_class_c_session
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
pub async fn update_remote_multicast_class_c_session(
    conn: &mut PgConnection,
    sess: &mut RemoteMulticastClassCSession,
) -> Result<()> {
    sess.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        update remote_multicast_class_c_session
        set
            updated_at = $3,
            mc_group_id = $4,
            dl_frequency = $5,
            dr = $6,
            session_time = $7,
            session_time_out = $8,
            state_provisioned = $9,
            retry_after = $10,
            retry_count = $11,
            retry_interval_secs = $12
        where dev_eui = $1 and multicast_group_id = $2
        "#,
    )
    .bind(sess.dev_eui)
    .bind(sess.multicast_group_id)
    .bind(sess.updated_at)
    .bind(sess.mc_group_id)
    .bind(sess.dl_frequency)
    .bind(sess.dr)
    .bind(sess.session_time)
    .bind(sess.session_time_out)
    .bind(sess.state_provisioned)
    .bind(sess.retry_after)
    .bind(sess.retry_count)
    .bind(sess.retry_interval_secs)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}
