// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for the engine integration tests.
//!
//! Tests are skipped silently when `TEST_DATABASE_URL` is not set. Each
//! test runs inside one transaction that is rolled back on drop, so tests
//! leave no rows behind and can run concurrently; device identifiers are
//! randomised to keep row locks disjoint.

#![allow(dead_code)]

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use fuota_applayer::types::{Aes128Key, DevAddr, Eui64};
use fuota_core::storage::{self, MulticastGroup};

/// Connects to the test database and applies migrations.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    fuota_core::migrations::run_postgres(&pool).await.ok()?;
    Some(pool)
}

/// Returns a device identifier unique to this test run.
pub fn random_dev_eui() -> Eui64 {
    let uuid = Uuid::new_v4();
    let mut b = [0u8; 8];
    b.copy_from_slice(&uuid.as_bytes()[..8]);
    Eui64(b)
}

/// Creates a multicast group with the given key material and counters.
pub async fn seed_multicast_group(
    conn: &mut PgConnection,
    mc_key: Aes128Key,
    mc_app_s_key: Aes128Key,
    f_cnt: i64,
    frequency: i64,
    dr: i16,
) -> MulticastGroup {
    let mut mg = MulticastGroup {
        id: Uuid::nil(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
        name: "test-mg".into(),
        mc_addr: DevAddr::default(),
        mc_key,
        mc_app_s_key,
        f_cnt,
        frequency,
        dr,
    };
    storage::create_multicast_group(conn, &mut mg)
        .await
        .expect("create multicast group");
    mg
}
