// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FUOTA deployment storage.

use chrono::{DateTime, Utc};
use fuota_applayer::fragmentation::Descriptor;
use fuota_applayer::types::Eui64;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{FuotaDeploymentState, GroupType};

/// FUOTA deployment record: one firmware payload rolled out to a set of
/// devices through a multicast group.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FuotaDeployment {
    /// Deployment identifier.
    pub id: Uuid,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// When the deployment was last updated.
    pub updated_at: DateTime<Utc>,
    /// Display name.
    pub name: String,
    /// Multicast group carrying the fragments; attached out-of-band.
    pub multicast_group_id: Option<Uuid>,
    /// Multicast group type.
    pub group_type: GroupType,
    /// Downlink data-rate index.
    pub dr: i16,
    /// Downlink frequency in Hz.
    pub frequency: i64,
    /// Firmware payload.
    pub payload: Vec<u8>,
    /// Fragment size, derived from the regional maximum payload size.
    pub frag_size: i32,
    /// Number of redundancy fragments added by the encoder.
    pub redundancy: i32,
    /// Erasure-code matrix selector.
    pub fragmentation_matrix: i16,
    /// Block acknowledgement delay exponent.
    pub block_ack_delay: i16,
    /// Opaque file descriptor announced to the devices.
    pub descriptor: Descriptor,
    /// Class-C session timeout exponent.
    pub multicast_timeout: i16,
    /// Per-device unicast provisioning timeout, seconds.
    pub unicast_timeout_secs: i64,
    /// Current stage.
    pub state: FuotaDeploymentState,
    /// Earliest time the driver may advance the deployment again.
    pub next_step_after: DateTime<Utc>,
}

const COLUMNS: &str = r#"
    id, created_at, updated_at, name, multicast_group_id, group_type, dr,
    frequency, payload, frag_size, redundancy, fragmentation_matrix,
    block_ack_delay, descriptor, multicast_timeout, unicast_timeout_secs,
    state, next_step_after
"#;

/// Create a deployment together with its device link row. The deployment
/// becomes pending immediately.
pub async fn create_fuota_deployment_for_device(
    conn: &mut PgConnection,
    fd: &mut FuotaDeployment,
    dev_eui: Eui64,
) -> Result<()> {
    if fd.id.is_nil() {
        fd.id = Uuid::new_v4();
    }
    let now = Utc::now();
    fd.created_at = now;
    fd.updated_at = now;
    fd.next_step_after = now;

    sqlx::query(
        r#"
        insert into fuota_deployment (
            id, created_at, updated_at, name, multicast_group_id, group_type,
            dr, frequency, payload, frag_size, redundancy,
            fragmentation_matrix, block_ack_delay, descriptor,
            multicast_timeout, unicast_timeout_secs, state, next_step_after
        ) values (
            $1, $2, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
            $15, $16, $2
        )
        "#,
    )
    .bind(fd.id)
    .bind(now)
    .bind(&fd.name)
    .bind(fd.multicast_group_id)
    .bind(fd.group_type)
    .bind(fd.dr)
    .bind(fd.frequency)
    .bind(&fd.payload)
    .bind(fd.frag_size)
    .bind(fd.redundancy)
    .bind(fd.fragmentation_matrix)
    .bind(fd.block_ack_delay)
    .bind(fd.descriptor)
    .bind(fd.multicast_timeout)
    .bind(fd.unicast_timeout_secs)
    .bind(fd.state)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        insert into fuota_deployment_device (fuota_deployment_id, dev_eui, created_at)
        values ($1, $2, $3)
        "#,
    )
    .bind(fd.id)
    .bind(dev_eui)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a deployment, optionally locking the row for the transaction.
pub async fn get_fuota_deployment(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<FuotaDeployment> {
    let mut query = format!("select {COLUMNS} from fuota_deployment where id = $1");
    if for_update {
        query.push_str(" for update");
    }

    sqlx::query_as::<_, FuotaDeployment>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(Error::DoesNotExist)
}

/// Persist a deployment after a stage transition.
pub async fn update_fuota_deployment(
    conn: &mut PgConnection,
    fd: &mut FuotaDeployment,
) -> Result<()> {
    fd.updated_at = Utc::now();

    let result = sqlx::query(
        r#"
        update fuota_deployment
        set
            updated_at = $2,
            name = $3,
            multicast_group_id = $4,
            dr = $5,
            frequency = $6,
            payload = $7,
            frag_size = $8,
            redundancy = $9,
            fragmentation_matrix = $10,
            block_ack_delay = $11,
            descriptor = $12,
            multicast_timeout = $13,
            unicast_timeout_secs = $14,
            state = $15,
            next_step_after = $16
        where id = $1
        "#,
    )
    .bind(fd.id)
    .bind(fd.updated_at)
    .bind(&fd.name)
    .bind(fd.multicast_group_id)
    .bind(fd.dr)
    .bind(fd.frequency)
    .bind(&fd.payload)
    .bind(fd.frag_size)
    .bind(fd.redundancy)
    .bind(fd.fragmentation_matrix)
    .bind(fd.block_ack_delay)
    .bind(fd.descriptor)
    .bind(fd.multicast_timeout)
    .bind(fd.unicast_timeout_secs)
    .bind(fd.state)
    .bind(fd.next_step_after)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}

/// Get deployments due for a stage transition, locking the rows and
/// skipping any a concurrent driver already holds.
pub async fn get_pending_fuota_deployments(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<FuotaDeployment>> {
    let records = sqlx::query_as::<_, FuotaDeployment>(&format!(
        r#"
        select {COLUMNS}
        from fuota_deployment
        where
            state != $1
            and next_step_after <= now()
        limit $2
        for update
        skip locked
        "#
    ))
    .bind(FuotaDeploymentState::Done)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(records)
}
