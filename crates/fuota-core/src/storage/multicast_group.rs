// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multicast group storage.
//!
//! Groups are created out-of-band; the engine reads them and advances the
//! frame counter under the row lock taken by the multicast enqueue.

use chrono::Utc;
use fuota_applayer::types::{Aes128Key, DevAddr};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Multicast group record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MulticastGroup {
    /// Group identifier.
    pub id: Uuid,
    /// When the group was created.
    pub created_at: chrono::DateTime<Utc>,
    /// When the group was last updated.
    pub updated_at: chrono::DateTime<Utc>,
    /// Display name.
    pub name: String,
    /// Multicast network address.
    pub mc_addr: DevAddr,
    /// Group root key; never transmitted.
    pub mc_key: Aes128Key,
    /// Application session key encrypting multicast payloads.
    pub mc_app_s_key: Aes128Key,
    /// Next multicast frame counter to assign.
    pub f_cnt: i64,
    /// Downlink frequency in Hz.
    pub frequency: i64,
    /// Downlink data-rate index.
    pub dr: i16,
}

const COLUMNS: &str = r#"
    id, created_at, updated_at, name, mc_addr, mc_key, mc_app_s_key, f_cnt,
    frequency, dr
"#;

/// Create a multicast group. Generates the id when it is nil.
pub async fn create_multicast_group(
    conn: &mut PgConnection,
    mg: &mut MulticastGroup,
) -> Result<()> {
    if mg.id.is_nil() {
        mg.id = Uuid::new_v4();
    }
    let now = Utc::now();
    mg.created_at = now;
    mg.updated_at = now;

    sqlx::query(
        r#"
        insert into multicast_group (
            id, created_at, updated_at, name, mc_addr, mc_key, mc_app_s_key,
            f_cnt, frequency, dr
        ) values ($1, $2, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(mg.id)
    .bind(now)
    .bind(&mg.name)
    .bind(mg.mc_addr)
    .bind(mg.mc_key)
    .bind(mg.mc_app_s_key)
    .bind(mg.f_cnt)
    .bind(mg.frequency)
    .bind(mg.dr)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a multicast group, optionally locking the row for the transaction.
pub async fn get_multicast_group(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<MulticastGroup> {
    let mut query = format!("select {COLUMNS} from multicast_group where id = $1");
    if for_update {
        query.push_str(" for update");
    }

    sqlx::query_as::<_, MulticastGroup>(&query)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(Error::DoesNotExist)
}

/// Persist an advanced frame counter for a group.
pub async fn update_multicast_group_f_cnt(
    conn: &mut PgConnection,
    id: Uuid,
    f_cnt: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        update multicast_group
        set updated_at = $2, f_cnt = $3
        where id = $1
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .bind(f_cnt)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DoesNotExist);
    }

    Ok(())
}
