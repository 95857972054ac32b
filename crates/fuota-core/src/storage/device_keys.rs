// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device root-key storage.

use chrono::{DateTime, Utc};
use fuota_applayer::types::{Aes128Key, Eui64};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Root key material of one device. Exactly one of the keys is used for
/// multicast key derivation: a non-zero `app_key` (LoRaWAN 1.1) wins over
/// `gen_app_key` (LoRaWAN 1.0).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeviceKeys {
    /// Device identifier.
    pub dev_eui: Eui64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// LoRaWAN 1.1 AppKey; all-zero when unset.
    pub app_key: Aes128Key,
    /// LoRaWAN 1.0 GenAppKey; all-zero when unset.
    pub gen_app_key: Aes128Key,
}

/// Create a device-keys record.
pub async fn create_device_keys(conn: &mut PgConnection, dk: &mut DeviceKeys) -> Result<()> {
    let now = Utc::now();
    dk.created_at = now;
    dk.updated_at = now;

    sqlx::query(
        r#"
        insert into device_keys (dev_eui, created_at, updated_at, app_key, gen_app_key)
        values ($1, $2, $2, $3, $4)
        "#,
    )
    .bind(dk.dev_eui)
    .bind(now)
    .bind(dk.app_key)
    .bind(dk.gen_app_key)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get the key material for a device.
pub async fn get_device_keys(conn: &mut PgConnection, dev_eui: Eui64) -> Result<DeviceKeys> {
    sqlx::query_as::<_, DeviceKeys>(
        r#"
        select dev_eui, created_at, updated_at, app_key, gen_app_key
        from device_keys
        where dev_eui = $1
        "#,
    )
    .bind(dev_eui)
    .fetch_optional(conn)
    .await?
    .ok_or(Error::DoesNotExist)
}

/// Get the key material of every device participating in a deployment.
pub async fn get_device_keys_for_fuota_deployment(
    conn: &mut PgConnection,
    fuota_deployment_id: Uuid,
) -> Result<Vec<DeviceKeys>> {
    let records = sqlx::query_as::<_, DeviceKeys>(
        r#"
        select
            dk.dev_eui, dk.created_at, dk.updated_at, dk.app_key, dk.gen_app_key
        from
            fuota_deployment_device dd
        inner join
            device_keys dk
            on dd.dev_eui = dk.dev_eui
        where
            dd.fuota_deployment_id = $1
        "#,
    )
    .bind(fuota_deployment_id)
    .fetch_all(conn)
    .await?;

    Ok(records)
}
